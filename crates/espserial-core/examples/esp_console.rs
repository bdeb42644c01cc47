//! ESP32 Console Tool
//!
//! Connects to the first available candidate port, sends each command given
//! on the command line and prints the reply. Unsolicited log lines are
//! printed through `tracing` as they arrive.
//!
//! Usage:
//!   cargo run --example esp_console -- [OPTIONS] COMMAND...
//!
//! Options:
//!   --port PORT       Candidate serial port, may repeat (default: auto-detect)
//!   --baud RATE       Baud rate (default: 115200)
//!   --timeout MS      Per-attempt response timeout in ms (default: 1500)
//!   --expect TEXT     Text the reply must contain (default: any reply)
//!   --config FILE     Load settings from a JSON file

use espserial_core::prelude::*;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = InterfaceConfig::default();
    let mut expect = String::new();
    let mut commands = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    config.ports.push(args[i].clone());
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    config.baud_rate = args[i].parse().unwrap_or(115200);
                }
            }
            "--timeout" | "-t" => {
                i += 1;
                if i < args.len() {
                    config.response_timeout_ms = args[i].parse().unwrap_or(1500);
                }
            }
            "--expect" | "-e" => {
                i += 1;
                if i < args.len() {
                    expect = args[i].clone();
                }
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    match InterfaceConfig::from_file(&args[i]) {
                        Ok(loaded) => config = loaded,
                        Err(e) => {
                            eprintln!("{}", e);
                            std::process::exit(1);
                        }
                    }
                }
            }
            "--help" | "-h" => {
                println!("Usage: esp_console [--port PORT]... [--baud RATE] [--timeout MS] [--expect TEXT] [--config FILE] COMMAND...");
                return;
            }
            other => commands.push(other.to_string()),
        }
        i += 1;
    }

    let serial = match SerialInterface::open(config) {
        Ok(serial) => serial,
        Err(e) => {
            eprintln!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    // Wait for the first connection attempt
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while !serial.is_connected() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    match serial.connected_port() {
        Some(port) => println!("Connected to {}", port),
        None => println!("No device connected yet"),
    }

    for command in &commands {
        let reply = serial.send(command.as_str(), expect.as_str());
        match reply.kind() {
            EventKind::CliResponse => {
                println!("{} -> {}", command, reply.content().unwrap_or_default())
            }
            _ => println!("{} -> {}", command, reply),
        }
    }

    serial.shutdown();
}
