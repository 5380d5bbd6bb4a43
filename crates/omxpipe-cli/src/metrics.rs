// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use omxpipe::drain::DrainReport;
use serde::Serialize;
use std::time::Duration;

/// Performance metrics for one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetrics {
    /// Total number of frames drained
    pub frames_processed: u64,
    /// Total payload bytes drained
    pub bytes_processed: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Average throughput in frames per second
    pub throughput_fps: f64,
    /// Average bandwidth in megabits per second
    pub bandwidth_mbps: f64,
    /// Buffers handed back to the component
    pub resubmitted: u64,
    /// Buffers retired to the free pool
    pub retired: u64,
    /// Resubmissions refused by the component
    pub resubmit_failures: u64,
    /// Pause/resume cycles performed
    pub pauses: u64,
    /// End of stream was observed
    pub eos: bool,
    /// The frame budget stopped the run
    pub budget_reached: bool,
}

impl PipelineMetrics {
    /// Derive metrics from a drain report and the wall-clock duration
    pub fn new(report: &DrainReport, duration: Duration, pauses: u64) -> Self {
        let duration_secs = duration.as_secs_f64();

        let throughput_fps = if duration_secs > 0.0 {
            report.frames as f64 / duration_secs
        } else {
            0.0
        };
        let bandwidth_mbps = if duration_secs > 0.0 {
            (report.bytes as f64 * 8.0) / (duration_secs * 1_000_000.0)
        } else {
            0.0
        };

        PipelineMetrics {
            frames_processed: report.frames,
            bytes_processed: report.bytes,
            duration_ms: duration.as_millis() as u64,
            throughput_fps,
            bandwidth_mbps,
            resubmitted: report.resubmitted,
            retired: report.retired,
            resubmit_failures: report.resubmit_failures,
            pauses,
            eos: report.eos,
            budget_reached: report.budget_reached,
        }
    }

    /// Print metrics in human-readable format
    pub fn print_text(&self) {
        println!("\n=== Pipeline Metrics ===");
        println!("Frames processed:  {}", self.frames_processed);
        println!(
            "Bytes processed:   {} ({:.2} MB)",
            self.bytes_processed,
            self.bytes_processed as f64 / 1_048_576.0
        );
        println!("Duration:          {:.2} s", self.duration_ms as f64 / 1000.0);
        println!("Throughput:        {:.2} fps", self.throughput_fps);
        println!("Bandwidth:         {:.2} Mbps", self.bandwidth_mbps);
        println!("Resubmitted:       {}", self.resubmitted);
        println!("Retired:           {}", self.retired);

        if self.resubmit_failures > 0 {
            println!("Resubmit failures: {}", self.resubmit_failures);
        }
        if self.pauses > 0 {
            println!("Pause cycles:      {}", self.pauses);
        }
        if self.eos {
            println!("End of stream:     yes");
        }
        if self.budget_reached {
            println!("Frame budget:      reached");
        }
    }

    /// Print metrics in JSON format
    pub fn print_json(&self) -> Result<(), serde_json::Error> {
        let json = serde_json::to_string_pretty(self)?;
        println!("{}", json);
        Ok(())
    }
}
