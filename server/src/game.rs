//! The session: one owner of the color pool, admission policy and replicated
//! entity state.
//!
//! Every mutation of the session goes through `&mut GameState`, and the network
//! layer funnels connects, disconnects, peer requests and operator commands
//! through a single channel into the one task that owns it. A color request
//! racing a disconnect for the same peer, or two peers racing for the last free
//! color, are therefore applied one after the other and never interleave.

use crate::admission::AdmissionController;
use crate::color_pool::ColorPool;
use crate::error::{ConfigError, SessionError};
use crate::gateway::RequestGateway;
use crate::replication::{
    ColorField, DeliverySink, PositionField, ReplicatedStateStore, ServerAuthority,
};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{AdmissionDecision, Color, EntityId, PeerId, Vec3, MASTER_COLORS};
use std::collections::HashSet;

/// Fixed for the lifetime of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Colors handed out, in initial pool order. Capacity equals its length.
    pub palette: Vec<Color>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            palette: MASTER_COLORS.to_vec(),
        }
    }
}

impl SessionConfig {
    pub fn capacity(&self) -> usize {
        self.palette.len()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.palette.is_empty() {
            return Err(ConfigError::EmptyPalette);
        }
        let mut seen = HashSet::new();
        for color in &self.palette {
            if !seen.insert(*color) {
                return Err(ConfigError::DuplicateColor(*color));
            }
        }
        Ok(())
    }
}

/// Events that mutate the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    PeerConnected { peer: PeerId },
    PeerDisconnected { peer: PeerId },
    MoveRequest { issuer: PeerId },
    ColorChangeRequest { issuer: PeerId },
    /// Local operator action, never produced from a peer packet
    OperatorMoveAll,
}

pub struct GameState {
    pool: ColorPool,
    admission: AdmissionController,
    store: ReplicatedStateStore,
    rng: StdRng,
}

impl GameState {
    pub fn new(config: SessionConfig, sink: impl DeliverySink + 'static) -> Result<Self, ConfigError> {
        Self::with_rng(config, sink, StdRng::from_entropy())
    }

    /// Session with a caller-supplied random source, for reproducible moves
    pub fn with_rng(
        config: SessionConfig,
        sink: impl DeliverySink + 'static,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            pool: ColorPool::new(&config.palette),
            admission: AdmissionController::new(config.capacity()),
            store: ReplicatedStateStore::new(sink),
            rng,
        })
    }

    /// Decides whether one more peer may join. Changes nothing.
    pub fn evaluate_connection(&self) -> AdmissionDecision {
        self.admission.evaluate_connection(self.pool.assigned_count())
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        match event {
            SessionEvent::PeerConnected { peer } => self.peer_connected(peer).map(|_| ()),
            SessionEvent::PeerDisconnected { peer } => self.peer_disconnected(peer).map(|_| ()),
            SessionEvent::MoveRequest { issuer } => self.gateway().handle_move(issuer).map(|_| ()),
            SessionEvent::ColorChangeRequest { issuer } => {
                self.gateway().handle_color_change(issuer).map(|_| ())
            }
            SessionEvent::OperatorMoveAll => {
                let moved = self.gateway().move_all();
                info!("Operator moved {} entities", moved);
                Ok(())
            }
        }
    }

    /// Assigns the new peer a color, spawns its entity and commits the initial
    /// color and position
    pub fn peer_connected(&mut self, peer: PeerId) -> Result<EntityId, SessionError> {
        if self.store.entity_of(peer).is_some() {
            return Err(SessionError::AlreadyConnected(peer));
        }

        let color = self.pool.acquire(peer)?;
        let entity = self.store.spawn(peer);

        self.store
            .observe::<ColorField>(
                entity,
                Box::new(|entity, color| debug!("Entity {} tinted {}", entity, color)),
            )?;
        self.store
            .observe::<PositionField>(
                entity,
                Box::new(|entity, position| debug!("Entity {} placed at {}", entity, position)),
            )?;

        self.store
            .write::<ColorField>(&ServerAuthority::new(), entity, color)?;
        let position = self.gateway().handle_move(peer)?;

        info!(
            "Peer {} joined with entity {} ({} at {}), {}/{} slots used",
            peer,
            entity,
            color,
            position,
            self.pool.assigned_count(),
            self.pool.capacity()
        );
        Ok(entity)
    }

    /// Reclaims the peer's color and removes its entity
    ///
    /// Unknown peers are a no-op reported as `UnknownPeer`.
    pub fn peer_disconnected(&mut self, peer: PeerId) -> Result<Color, SessionError> {
        let released = self.pool.release(peer);
        self.store.despawn(peer);

        let color = released.ok_or(SessionError::UnknownPeer(peer))?;
        info!("Peer {} left, {} back in the pool", peer, color);
        Ok(color)
    }

    pub fn handle_move(&mut self, issuer: PeerId) -> Result<Vec3, SessionError> {
        self.gateway().handle_move(issuer)
    }

    pub fn handle_color_change(&mut self, issuer: PeerId) -> Result<Color, SessionError> {
        self.gateway().handle_color_change(issuer)
    }

    /// Bulk move of every connected entity, reserved for the local operator
    pub fn operator_move_all(&mut self) -> usize {
        self.gateway().move_all()
    }

    pub fn pool(&self) -> &ColorPool {
        &self.pool
    }

    pub fn store(&self) -> &ReplicatedStateStore {
        &self.store
    }

    pub fn peer_count(&self) -> usize {
        self.pool.assigned_count()
    }

    pub fn color_of(&self, peer: PeerId) -> Option<Color> {
        self.pool.color_of(peer)
    }

    pub fn position_of(&self, peer: PeerId) -> Option<Vec3> {
        let entity = self.store.entity_of(peer)?;
        self.store.read::<PositionField>(entity)
    }

    /// Writes the pool and entity table to the log
    pub fn log_status(&self) {
        let free: Vec<&str> = self.pool.free_colors().iter().map(Color::name).collect();
        info!(
            "{}/{} peers connected, free colors: [{}]",
            self.pool.assigned_count(),
            self.pool.capacity(),
            free.join(", ")
        );

        for (peer, color) in self.pool.assignments() {
            match self.store.entity_of(peer) {
                Some(entity) => {
                    let position = self
                        .store
                        .read::<PositionField>(entity)
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "unplaced".to_string());
                    info!("  peer {} -> entity {}: {} at {}", peer, entity, color, position);
                }
                None => warn!("  peer {} holds {} but has no entity", peer, color),
            }
        }
    }

    fn gateway(&mut self) -> RequestGateway<'_, StdRng> {
        RequestGateway::new(&mut self.pool, &mut self.store, &mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::Delivery;
    use shared::Notification;
    use tokio::sync::mpsc;

    fn session() -> (GameState, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel::<Delivery>();
        let game =
            GameState::with_rng(SessionConfig::default(), tx, StdRng::seed_from_u64(1)).unwrap();
        (game, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Ok(delivery) = rx.try_recv() {
            out.push(delivery);
        }
        out
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        assert_eq!(SessionConfig::default().capacity(), 6);

        let empty = SessionConfig { palette: vec![] };
        assert_eq!(empty.validate(), Err(ConfigError::EmptyPalette));

        let duplicated = SessionConfig {
            palette: vec![Color::Red, Color::Blue, Color::Red],
        };
        assert_eq!(
            duplicated.validate(),
            Err(ConfigError::DuplicateColor(Color::Red))
        );
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let (tx, _rx) = mpsc::unbounded_channel::<Delivery>();
        let result = GameState::new(SessionConfig { palette: vec![] }, tx);
        assert!(matches!(result, Err(ConfigError::EmptyPalette)));
    }

    #[test]
    fn test_peer_connected_commits_color_and_position() {
        let (mut game, mut rx) = session();

        let entity = game.peer_connected(1).unwrap();

        assert_eq!(game.color_of(1), Some(Color::Red));
        assert!(game.position_of(1).unwrap().is_on_plane());
        assert_eq!(game.store().owner_of(entity), Some(1));

        let kinds: Vec<&'static str> = drain(&mut rx)
            .iter()
            .map(|d| match d.notification {
                Notification::EntitySpawned { .. } => "spawn",
                Notification::EntityColorChanged { .. } => "color",
                Notification::EntityPositionChanged { .. } => "position",
                Notification::EntityDespawned { .. } => "despawn",
            })
            .collect();
        assert_eq!(kinds, vec!["spawn", "color", "position"]);
    }

    #[test]
    fn test_duplicate_connect_is_rejected() {
        let (mut game, _rx) = session();
        game.peer_connected(1).unwrap();

        assert_eq!(game.peer_connected(1), Err(SessionError::AlreadyConnected(1)));
        assert_eq!(game.peer_count(), 1);
        assert_eq!(game.color_of(1), Some(Color::Red));
    }

    #[test]
    fn test_admission_tracks_assignments() {
        let (mut game, _rx) = session();
        for peer in 1..=6 {
            assert!(game.evaluate_connection().approved);
            game.apply(SessionEvent::PeerConnected { peer }).unwrap();
        }

        let decision = game.evaluate_connection();
        assert!(!decision.approved);
        assert_eq!(decision.reason.as_deref(), Some("lobby full (6 players max)"));

        game.apply(SessionEvent::PeerDisconnected { peer: 4 }).unwrap();
        assert!(game.evaluate_connection().approved);
    }

    #[test]
    fn test_disconnect_unknown_peer() {
        let (mut game, mut rx) = session();
        game.peer_connected(1).unwrap();
        drain(&mut rx);

        assert_eq!(game.peer_disconnected(9), Err(SessionError::UnknownPeer(9)));
        assert_eq!(game.peer_count(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_requests_after_disconnect_are_dropped() {
        let (mut game, mut rx) = session();
        game.peer_connected(1).unwrap();
        game.peer_connected(2).unwrap();
        game.peer_disconnected(1).unwrap();
        drain(&mut rx);

        assert_eq!(
            game.apply(SessionEvent::ColorChangeRequest { issuer: 1 }),
            Err(SessionError::ForeignTarget { issuer: 1 })
        );
        assert_eq!(
            game.apply(SessionEvent::MoveRequest { issuer: 1 }),
            Err(SessionError::ForeignTarget { issuer: 1 })
        );
        assert_eq!(game.color_of(1), None);
        assert!(game.pool().is_conserved());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_operator_move_all() {
        let (mut game, mut rx) = session();
        for peer in 1..=3 {
            game.peer_connected(peer).unwrap();
        }
        drain(&mut rx);

        game.apply(SessionEvent::OperatorMoveAll).unwrap();

        // One position update per entity, delivered to each of the three peers.
        let deliveries = drain(&mut rx);
        assert_eq!(deliveries.len(), 9);
        for peer in 1..=3 {
            assert!(game.position_of(peer).unwrap().is_on_plane());
        }
    }
}
