//! Printer console
//!
//! Connects to a printer (or the virtual one) and bridges stdin to the
//! connection: type G-code, watch the firmware's replies and the engine's
//! events. Usage:
//!
//! ```text
//! printkit [PORT] [BAUD]
//! printkit --list
//! ```
//!
//! `PORT` defaults to `VIRTUAL`; `BAUD` defaults to auto-detection.

use printkit::{
    init_logging, BaudRate, ConnectionConfig, ConnectionState, PrinterConnection, PrinterEvent,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--list") {
        for port in printkit::list_ports(true, None)? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let port = args
        .first()
        .cloned()
        .unwrap_or_else(|| printkit::VIRTUAL_PORT.to_string());
    let baud = match args.get(1) {
        Some(raw) => BaudRate::Fixed(raw.parse()?),
        None => BaudRate::Auto,
    };

    let mut config = ConnectionConfig::for_port(&port);
    config.baud = baud;
    config.dev_mode = true;

    let connection = PrinterConnection::new(config);
    let mut events = connection.subscribe_events();
    connection.connect()?;

    let connected = connection
        .wait_for_state(
            |state| state == ConnectionState::Operational || state.is_error(),
            Duration::from_secs(30),
        )
        .await;
    if !connected || connection.state().is_error() {
        anyhow::bail!(
            "could not connect to {}: {}",
            port,
            connection.error().unwrap_or_else(|| "timeout".to_string())
        );
    }
    println!(
        "connected to {} @ {} ({})",
        port,
        connection.baud_rate(),
        connection
            .firmware_info()
            .firmware_name()
            .unwrap_or("unknown firmware")
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(PrinterEvent::Log(line)) => println!("< {}", line),
                    Ok(PrinterEvent::Disconnected) => {
                        println!("disconnected");
                        break;
                    }
                    Ok(event) => println!("* {}", event),
                    Err(_) => {}
                }
            }
            line = stdin.next_line() => {
                match line? {
                    Some(line) if !line.trim().is_empty() => {
                        if let Err(e) = connection.send_command(line.trim()) {
                            eprintln!("rejected: {}", e);
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }
    }

    connection.disconnect().await;
    Ok(())
}
