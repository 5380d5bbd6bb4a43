// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use clap::Args as ClapArgs;
use omxpipe::params::PortDirection;
use omxpipe::session::create_session;
use serde::Serialize;

/// Component names this build can open
const COMPONENT_NAMES: &[&str] = &["loopback.video", "loopback.camera"];

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Only show this component
    #[arg(short, long)]
    component: Option<String>,
}

#[derive(Debug, Serialize)]
struct PortInfo {
    port: u32,
    direction: String,
    enabled: bool,
    buffers: usize,
    buffer_size: usize,
    width: u32,
    height: u32,
    format: String,
    frame_rate: u32,
}

#[derive(Debug, Serialize)]
struct ComponentInfo {
    name: String,
    ports: Vec<PortInfo>,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    version: String,
    components: Vec<ComponentInfo>,
}

/// Display available components and their port definitions
pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    let names: Vec<&str> = match &args.component {
        Some(name) => vec![name.as_str()],
        None => COMPONENT_NAMES.to_vec(),
    };

    let mut components = Vec::new();
    for name in names {
        components.push(inspect(name)?);
    }

    let output = InfoOutput {
        version: omxpipe::version().to_string(),
        components,
    };

    if json {
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| CliError::General(format!("Failed to output JSON: {}", e)))?;
        println!("{}", text);
    } else {
        print_text(&output);
    }

    Ok(())
}

/// Open a component just long enough to read its port table
fn inspect(name: &str) -> Result<ComponentInfo, CliError> {
    let mut session = create_session().with_component_name(name).build()?;

    let ports = session
        .ports()
        .iter()
        .map(|def| PortInfo {
            port: def.port,
            direction: match def.direction {
                PortDirection::Input => "input".to_string(),
                PortDirection::Output => "output".to_string(),
            },
            enabled: def.enabled,
            buffers: def.buffer_count,
            buffer_size: def.buffer_size,
            width: def.width,
            height: def.height,
            format: def.format.name().to_string(),
            frame_rate: def.frame_rate,
        })
        .collect();

    session.shutdown()?;
    Ok(ComponentInfo {
        name: name.to_string(),
        ports,
    })
}

fn print_text(output: &InfoOutput) {
    println!("=== OMX Pipeline Information ===");
    println!("Library version:   {}", output.version);
    println!();

    for component in &output.components {
        println!("Component: {}", component.name);
        for port in &component.ports {
            println!(
                "  port {} {:6} {}x{} {} x{} ({} bytes{})",
                port.port,
                port.direction,
                port.width,
                port.height,
                port.format,
                port.buffers,
                port.buffer_size,
                if port.enabled { "" } else { ", disabled" }
            );
        }
        println!();
    }
}
