use clap::Parser;
use log::{error, info};
use server::game::SessionConfig;
use server::network::{BoxError, Server, ServerMessage};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Seconds of silence after which a client is disconnected
    #[arg(short, long, default_value = "5")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let mut server = Server::new(
        &address,
        SessionConfig::default(),
        Duration::from_secs(args.timeout),
    )
    .await?;

    info!("Operator commands: move, status, quit");
    spawn_console(server.handle());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}

/// Forwards operator console lines to the server loop
fn spawn_console(server_tx: mpsc::UnboundedSender<ServerMessage>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            match ServerMessage::from_console(&line) {
                Some(message) => {
                    let shutdown = matches!(message, ServerMessage::Shutdown);
                    if server_tx.send(message).is_err() || shutdown {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => info!("Unknown command '{}' (move, status, quit)", line.trim()),
            }
        }
    });
}
