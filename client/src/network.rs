use crate::commands::ConsoleCommand;
use crate::replica::{ReplicaChange, ReplicaWorld};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PeerId, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::interval;

/// Heartbeats keep the server from timing us out while idle
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Connect is resent on every heartbeat tick until answered, this many times
const MAX_CONNECT_ATTEMPTS: u32 = 5;

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    peer_id: Option<PeerId>,
    connected: bool,
    connect_attempts: u32,
    world: ReplicaWorld,
}

impl Client {
    pub async fn new(server_addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            peer_id: None,
            connected: false,
            connect_attempts: 0,
            world: ReplicaWorld::new(),
        })
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn world(&self) -> &ReplicaWorld {
        &self.world
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect_attempts += 1;
        info!(
            "Connecting to server {} (attempt {})...",
            self.server_addr, self.connect_attempts
        );

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Applies a packet from the server. Returns false once the session is over.
    pub fn handle_packet(&mut self, packet: Packet) -> bool {
        match packet {
            Packet::Admission { decision, peer_id } => {
                if decision.approved {
                    info!("Connected! Peer ID: {:?}", peer_id);
                    self.peer_id = peer_id;
                    self.connected = true;
                    self.world.set_local_peer(peer_id);
                    true
                } else {
                    warn!(
                        "Connection rejected: {}",
                        decision.reason.as_deref().unwrap_or("no reason given")
                    );
                    self.connected = false;
                    self.peer_id = None;
                    self.world.clear();
                    false
                }
            }

            Packet::Notify(notification) => {
                if let Some(change) = self.world.apply(notification) {
                    self.report(&change);
                }
                true
            }

            other => {
                warn!("Unexpected packet from server: {:?}", other);
                true
            }
        }
    }

    fn report(&self, change: &ReplicaChange) {
        let mine = |entity| {
            self.world
                .get(entity)
                .is_some_and(|e| Some(e.owner) == self.peer_id)
        };

        match *change {
            ReplicaChange::Spawned { entity, owner } => {
                info!("Entity {} joined (peer {})", entity, owner)
            }
            ReplicaChange::Despawned { entity } => info!("Entity {} left", entity),
            ReplicaChange::Moved { entity, position } if mine(entity) => {
                info!("You moved to {}", position)
            }
            ReplicaChange::Moved { entity, position } => {
                debug!("Entity {} moved to {}", entity, position)
            }
            ReplicaChange::Recolored { entity, color } if mine(entity) => {
                info!("You are now {}", color)
            }
            ReplicaChange::Recolored { entity, color } => {
                debug!("Entity {} is now {}", entity, color)
            }
        }
    }

    fn print_world(&self) {
        if self.world.is_empty() {
            println!("No entities");
            return;
        }

        for entity in self.world.entities() {
            let position = entity
                .position()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            let color = entity
                .color()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            let marker = if Some(entity.owner) == self.peer_id {
                " (you)"
            } else {
                ""
            };

            println!(
                "Entity {} peer {}{}: {} at {}",
                entity.id, entity.owner, marker, color, position
            );
        }
    }

    /// Runs the command on the server or locally. Returns false to quit.
    async fn handle_command(
        &mut self,
        command: ConsoleCommand,
    ) -> Result<bool, Box<dyn std::error::Error>> {
        match command {
            ConsoleCommand::Quit => return Ok(false),
            ConsoleCommand::List => self.print_world(),
            ConsoleCommand::Move | ConsoleCommand::Color => {
                if !self.connected {
                    warn!("Not connected yet");
                } else if let Some(packet) = command.to_packet() {
                    self.send_packet(&packet).await?;
                }
            }
        }
        Ok(true)
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);
        heartbeat_interval.tick().await;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) if addr == self.server_addr => {
                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => {
                                    if !self.handle_packet(packet) {
                                        break;
                                    }
                                }
                                Err(e) => debug!("Dropping malformed packet: {}", e),
                            }
                        }
                        Ok((_, addr)) => debug!("Ignoring packet from {}", addr),
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if self.connected {
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                    } else if self.connect_attempts < MAX_CONNECT_ATTEMPTS {
                        self.connect().await?;
                    } else {
                        error!("No answer from server after {} attempts", self.connect_attempts);
                        break;
                    }
                },

                line = lines.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) => match ConsoleCommand::parse(&line) {
                            Some(command) => {
                                if !self.handle_command(command).await? {
                                    break;
                                }
                            }
                            None if line.trim().is_empty() => {}
                            None => info!("{}", ConsoleCommand::HELP),
                        },
                        Ok(None) => stdin_open = false,
                        Err(e) => {
                            error!("Error reading stdin: {}", e);
                            stdin_open = false;
                        }
                    }
                },
            }
        }

        self.disconnect().await;

        Ok(())
    }

    /// Tells the server we are leaving. Best effort, the server times us out otherwise.
    pub async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }

        if let Err(e) = self.send_packet(&Packet::Disconnect).await {
            debug!("Error sending disconnect: {}", e);
        }
        self.connected = false;
        self.peer_id = None;
        self.world.clear();
    }
}
