// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use omxpipe::signal::CancelToken;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Parse a "WxH" (or "W*H") resolution argument into (width, height)
///
/// # Examples
/// ```
/// use omxpipe_cli::utils::parse_resolution;
/// assert_eq!(parse_resolution("1920x1080").unwrap(), (1920, 1080));
/// assert_eq!(parse_resolution("1280*720").unwrap(), (1280, 720));
/// ```
pub fn parse_resolution(s: &str) -> Result<(u32, u32), CliError> {
    let (width_str, height_str) = s
        .split_once('x')
        .or_else(|| s.split_once('*'))
        .ok_or_else(|| {
            CliError::InvalidArgs(format!("expected WxH or W*H resolution, got: {}", s))
        })?;

    let width = width_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("bad width in resolution: {}", s)))?;
    let height = height_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("bad height in resolution: {}", s)))?;

    if width == 0 || height == 0 {
        return Err(CliError::InvalidArgs(format!(
            "resolution dimensions must be non-zero: {}",
            s
        )));
    }

    Ok((width, height))
}

/// Install signal handlers for graceful shutdown on Ctrl+C or SIGTERM
///
/// Returns a cancellation token that trips when either signal arrives.
/// Hand it to the session builder so every blocking wait unblocks and the
/// teardown path runs.
pub fn install_signal_handler() -> Result<CancelToken, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    for signal in [SIGINT, SIGTERM] {
        flag::register(signal, Arc::clone(&term))
            .map_err(|e| CliError::General(format!("could not register signal handler: {}", e)))?;
    }

    log::debug!("installed SIGINT/SIGTERM handlers");
    Ok(CancelToken::from_flag(term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolution_accepts_both_separators() {
        assert_eq!(parse_resolution("640x480").unwrap(), (640, 480));
        assert_eq!(parse_resolution("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_resolution("3840*2160").unwrap(), (3840, 2160));
    }

    #[test]
    fn test_parse_resolution_rejects_malformed() {
        for bad in ["720", "1280x", "x720", "1280x720x30", "WxH", "0x0", "-640x480"] {
            assert!(parse_resolution(bad).is_err(), "{} should be rejected", bad);
        }
    }
}
