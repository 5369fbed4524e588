//! Scripted peer for poking a running server: joins, asks for a few color
//! changes and moves, prints every update it receives and leaves again.

use bincode::{deserialize, serialize};
use clap::Parser;
use shared::{Notification, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Number of color change + move rounds to send
    #[arg(short = 'r', long, default_value = "3")]
    rounds: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let server_addr = args.server.parse::<SocketAddr>()?;

    println!("Sending connection request to {}", server_addr);
    send(&socket, &Packet::Connect { client_version: PROTOCOL_VERSION }, server_addr).await?;

    let mut buf = [0u8; 2048];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await??;

    match deserialize::<Packet>(&buf[0..len])? {
        Packet::Admission {
            decision,
            peer_id: Some(peer_id),
        } if decision.approved => {
            println!("Connection accepted with peer ID: {}", peer_id);
        }
        Packet::Admission { decision, .. } => {
            println!(
                "Connection rejected: {}",
                decision.reason.unwrap_or_else(|| "no reason given".to_string())
            );
            return Ok(());
        }
        other => {
            println!("Expected Admission but got: {:?}", other);
            return Ok(());
        }
    }

    for round in 1..=args.rounds {
        println!("Round {}: requesting color change and move", round);
        send(&socket, &Packet::ColorChangeRequest, server_addr).await?;
        send(&socket, &Packet::MoveRequest, server_addr).await?;

        // Print whatever arrives before the next round.
        while let Ok(Ok((len, _))) =
            timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await
        {
            match deserialize::<Packet>(&buf[0..len]) {
                Ok(Packet::Notify(notification)) => print_notification(&notification),
                Ok(other) => println!("Unexpected packet: {:?}", other),
                Err(e) => println!("Failed to deserialize packet: {}", e),
            }
        }

        sleep(Duration::from_millis(250)).await;
    }

    println!("Sending disconnect request");
    send(&socket, &Packet::Disconnect, server_addr).await?;
    println!("Test client finished");

    Ok(())
}

async fn send(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = serialize(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::EntitySpawned {
            entity,
            owner,
            position,
            color,
            ..
        } => println!(
            "  Entity {} spawned for peer {} (color {:?}, position {:?})",
            entity, owner, color, position
        ),
        Notification::EntityDespawned { entity } => println!("  Entity {} despawned", entity),
        Notification::EntityPositionChanged {
            entity,
            position,
            seq,
        } => println!("  Entity {} moved to {} (#{})", entity, position, seq),
        Notification::EntityColorChanged { entity, color, seq } => {
            println!("  Entity {} is now {} (#{})", entity, color, seq)
        }
    }
}
