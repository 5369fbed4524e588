//! Server network layer: UDP transport in front of the session

use crate::client_manager::ClientManager;
use crate::error::SessionError;
use crate::game::{GameState, SessionConfig, SessionEvent};
use crate::replication::Delivery;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PeerId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Commands typed by the local server operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    MoveAll,
    Status,
}

/// Messages sent from network tasks and the operator console to the main loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: PeerId },
    Operator(OperatorCommand),
    Shutdown,
}

impl ServerMessage {
    /// Parses one line of operator console input
    pub fn from_console(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "move" => Some(ServerMessage::Operator(OperatorCommand::MoveAll)),
            "status" => Some(ServerMessage::Operator(OperatorCommand::Status)),
            "quit" | "exit" => Some(ServerMessage::Shutdown),
            _ => None,
        }
    }
}

/// Messages sent from the main loop to the network sender
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    Deliver(Delivery),
}

impl From<Delivery> for GameMessage {
    fn from(delivery: Delivery) -> Self {
        GameMessage::Deliver(delivery)
    }
}

/// UDP front end owning the session
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    client_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: SessionConfig,
        client_timeout: Duration,
    ) -> Result<Self, BoxError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let game_state = GameState::new(config, game_tx.clone())?;

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new())),
            game_state,
            client_timeout,
            tasks: Vec::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BoxError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sender for operator commands and shutdown requests
    pub fn handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Spawns task that drains the outbound queue
    ///
    /// Peer addresses are resolved when a delivery is sent, so updates queued
    /// for a peer that has since disconnected are dropped.
    fn spawn_network_sender(&mut self) {
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);

        self.tasks.push(tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::Deliver(Delivery { peer, notification }) => {
                        let addr = {
                            let clients_guard = clients.read().await;
                            clients_guard.addr_of(peer)
                        };

                        let Some(addr) = addr else {
                            debug!(
                                "Peer {} gone, dropping update for entity {}",
                                peer,
                                notification.entity()
                            );
                            continue;
                        };

                        let packet = Packet::Notify(notification);
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send to client {}: {}", peer, e);
                        }
                    }
                }
            }
        }));
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&mut self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let timeout = self.client_timeout;

        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(timeout)
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        }));
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), BoxError> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Runs one event through the session and logs why it was dropped, if it was
    fn apply(&mut self, event: SessionEvent) {
        match self.game_state.apply(event) {
            Ok(()) => {}
            // The pool already warned about it.
            Err(SessionError::PoolExhausted { .. }) => {}
            Err(e) => debug!("Dropped {:?}: {}", event, e),
        }
    }

    /// Processes incoming packets
    ///
    /// The sender's identity is the peer bound to the source address; packets
    /// never name a peer or entity themselves.
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let sender = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)
        };

        let event = match packet {
            Packet::Connect { client_version } => {
                self.handle_connect(sender, client_version, addr).await;
                return;
            }
            Packet::Disconnect => {
                if let Some(client_id) = sender {
                    self.clients.write().await.remove_client(&client_id);
                    self.apply(SessionEvent::PeerDisconnected { peer: client_id });
                }
                return;
            }
            Packet::MoveRequest => sender.map(|issuer| SessionEvent::MoveRequest { issuer }),
            Packet::ColorChangeRequest => {
                sender.map(|issuer| SessionEvent::ColorChangeRequest { issuer })
            }
            Packet::Heartbeat => None,
            Packet::Admission { .. } | Packet::Notify(_) => {
                warn!("Unexpected packet type from client at {}", addr);
                return;
            }
        };

        match sender {
            Some(client_id) => {
                self.clients.write().await.touch(client_id);
            }
            None => {
                debug!("Ignoring packet from unbound address {}", addr);
                return;
            }
        }

        if let Some(event) = event {
            self.apply(event);
        }
    }

    async fn handle_connect(
        &mut self,
        existing: Option<PeerId>,
        client_version: u32,
        addr: SocketAddr,
    ) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        // Remove existing connection if present
        if let Some(existing_id) = existing {
            info!("Removing existing client {} from {}", existing_id, addr);
            self.clients.write().await.remove_client(&existing_id);
            self.apply(SessionEvent::PeerDisconnected { peer: existing_id });
        }

        let decision = match self.game_state.admission().check_version(client_version) {
            Some(rejection) => rejection,
            None => self.game_state.evaluate_connection(),
        };

        if !decision.approved {
            let rejection =
                SessionError::AdmissionRejected(decision.reason.clone().unwrap_or_default());
            info!("Client at {}: {}", addr, rejection);
            self.send_packet(
                Packet::Admission {
                    decision,
                    peer_id: None,
                },
                addr,
            );
            return;
        }

        let client_id = self.clients.write().await.add_client(addr);
        self.send_packet(
            Packet::Admission {
                decision,
                peer_id: Some(client_id),
            },
            addr,
        );
        self.apply(SessionEvent::PeerConnected { peer: client_id });
    }

    fn handle_operator(&mut self, command: OperatorCommand) {
        match command {
            OperatorCommand::MoveAll => self.apply(SessionEvent::OperatorMoveAll),
            OperatorCommand::Status => self.game_state.log_status(),
        }
    }

    /// Main server loop; returns after a shutdown message
    pub async fn run(&mut self) -> Result<(), BoxError> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!(
            "Server started successfully ({} player slots)",
            self.game_state.admission().capacity()
        );

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await;
                }
                ServerMessage::ClientTimeout { client_id } => {
                    info!("Client {} timed out", client_id);
                    self.apply(SessionEvent::PeerDisconnected { peer: client_id });
                }
                ServerMessage::Operator(command) => self.handle_operator(command),
                ServerMessage::Shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{AdmissionDecision, Notification, PROTOCOL_VERSION};
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_server_message_creation() {
        let packet = Packet::Connect { client_version: 1 };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        let msg = ServerMessage::PacketReceived {
            packet: packet.clone(),
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr);
                match p {
                    Packet::Connect { client_version } => {
                        assert_eq!(client_version, 1);
                    }
                    _ => panic!("Unexpected packet type"),
                }
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_console_parsing() {
        assert!(matches!(
            ServerMessage::from_console("move"),
            Some(ServerMessage::Operator(OperatorCommand::MoveAll))
        ));
        assert!(matches!(
            ServerMessage::from_console("  STATUS \n"),
            Some(ServerMessage::Operator(OperatorCommand::Status))
        ));
        assert!(matches!(
            ServerMessage::from_console("quit"),
            Some(ServerMessage::Shutdown)
        ));
        assert!(ServerMessage::from_console("recolor 3").is_none());
        assert!(ServerMessage::from_console("").is_none());
    }

    #[test]
    fn test_delivery_becomes_game_message() {
        let delivery = Delivery {
            peer: 4,
            notification: Notification::EntityDespawned { entity: 2 },
        };

        match GameMessage::from(delivery.clone()) {
            GameMessage::Deliver(d) => assert_eq!(d, delivery),
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<GameMessage>();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        let msg = GameMessage::SendPacket {
            packet: Packet::Admission {
                decision: AdmissionDecision::reject("lobby full (6 players max)"),
                peer_id: None,
            },
            addr,
        };
        assert!(tx.send(msg).is_ok());

        match rx.try_recv().unwrap() {
            GameMessage::SendPacket { packet, addr: a } => {
                assert_eq!(a, addr);
                assert!(matches!(packet, Packet::Admission { peer_id: None, .. }));
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let server = Server::new("127.0.0.1:0", SessionConfig::default(), Duration::from_secs(5))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_connect_from_bound_address_replaces_peer() {
        let mut server = Server::new("127.0.0.1:0", SessionConfig::default(), Duration::from_secs(5))
            .await
            .unwrap();
        let mut game_rx = server.game_rx.take().unwrap();
        let connect = || Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };

        let watcher = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40001);
        let rejoiner = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40002);
        server.handle_packet(connect(), watcher).await;
        server.handle_packet(connect(), rejoiner).await;

        let watcher_peer = server.clients.read().await.find_client_by_addr(watcher).unwrap();
        let first_peer = server.clients.read().await.find_client_by_addr(rejoiner).unwrap();
        let first_entity = server.game_state.store().entity_of(first_peer).unwrap();
        while game_rx.try_recv().is_ok() {}

        server.handle_packet(connect(), rejoiner).await;

        let second_peer = server.clients.read().await.find_client_by_addr(rejoiner).unwrap();
        assert_ne!(second_peer, first_peer);
        assert_eq!(server.clients.read().await.len(), 2);
        assert!(server.game_state.store().entity_of(first_peer).is_none());
        assert_eq!(server.game_state.color_of(first_peer), None);
        assert_eq!(server.game_state.peer_count(), 2);
        assert_eq!(server.game_state.pool().free_count(), 4);
        assert!(server.game_state.pool().is_conserved());

        let mut messages = Vec::new();
        while let Ok(message) = game_rx.try_recv() {
            messages.push(message);
        }
        assert!(messages.iter().any(|m| matches!(
            m,
            GameMessage::Deliver(Delivery {
                peer,
                notification: Notification::EntityDespawned { entity },
            }) if *peer == watcher_peer && *entity == first_entity
        )));
        assert!(messages.iter().any(|m| matches!(
            m,
            GameMessage::SendPacket {
                packet: Packet::Admission { peer_id: Some(id), .. },
                addr,
            } if *id == second_peer && *addr == rejoiner
        )));
    }

    #[tokio::test]
    async fn test_reconnect_alone_keeps_one_color_held() {
        let mut server = Server::new("127.0.0.1:0", SessionConfig::default(), Duration::from_secs(5))
            .await
            .unwrap();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40003);
        let connect = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };

        server.handle_packet(connect.clone(), addr).await;
        server.handle_packet(connect, addr).await;

        assert_eq!(server.game_state.peer_count(), 1);
        assert_eq!(server.game_state.pool().free_count(), 5);
        assert_eq!(server.game_state.store().len(), 1);
    }

    #[tokio::test]
    async fn test_server_rejects_bad_palette() {
        let result = Server::new(
            "127.0.0.1:0",
            SessionConfig { palette: vec![] },
            Duration::from_secs(5),
        )
        .await;
        assert!(result.is_err());
    }
}
