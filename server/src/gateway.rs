//! Request handling for peer-issued move and recolor requests
//!
//! Every request arrives tagged with the peer id the transport bound to its
//! sender. A request only ever acts on that peer's own entity: there is no
//! request naming a target, and the owner capability minted here cannot write
//! any other entity.

use crate::color_pool::ColorPool;
use crate::error::SessionError;
use crate::replication::{
    ColorField, OwnerAuthority, PositionField, ReplicatedStateStore, ServerAuthority,
};
use log::{debug, info};
use rand::Rng;
use shared::{Color, EntityId, PeerId, Vec3, PLANE_HALF_EXTENT, PLANE_HEIGHT};

/// Uniformly random point on the play plane
pub fn random_position_on_plane<R: Rng>(rng: &mut R) -> Vec3 {
    Vec3::new(
        rng.gen_range(-PLANE_HALF_EXTENT..=PLANE_HALF_EXTENT),
        PLANE_HEIGHT,
        rng.gen_range(-PLANE_HALF_EXTENT..=PLANE_HALF_EXTENT),
    )
}

/// Borrows the session's pool, store and random source for one request
pub struct RequestGateway<'a, R: Rng> {
    pool: &'a mut ColorPool,
    store: &'a mut ReplicatedStateStore,
    rng: &'a mut R,
}

impl<'a, R: Rng> RequestGateway<'a, R> {
    pub fn new(
        pool: &'a mut ColorPool,
        store: &'a mut ReplicatedStateStore,
        rng: &'a mut R,
    ) -> Self {
        Self { pool, store, rng }
    }

    /// Moves the issuer's entity to a random point on the plane
    pub fn handle_move(&mut self, issuer: PeerId) -> Result<Vec3, SessionError> {
        let entity = self.own_entity(issuer)?;
        let position = random_position_on_plane(&mut *self.rng);

        self.store
            .write::<PositionField>(&OwnerAuthority::new(issuer), entity, position)?;
        debug!("Peer {} moved entity {} to {}", issuer, entity, position);
        Ok(position)
    }

    /// Hands the issuer the next free color and commits it to its entity
    pub fn handle_color_change(&mut self, issuer: PeerId) -> Result<Color, SessionError> {
        let entity = self.own_entity(issuer)?;
        let color = self.pool.acquire(issuer)?;

        self.store
            .write::<ColorField>(&ServerAuthority::new(), entity, color)?;
        info!("Peer {} now holds {}", issuer, color);
        Ok(color)
    }

    /// Moves every connected peer's entity
    ///
    /// Operator action only; no packet maps to it.
    pub(crate) fn move_all(&mut self) -> usize {
        let mut moved = 0;
        for peer in self.store.connected_peers() {
            if self.handle_move(peer).is_ok() {
                moved += 1;
            }
        }
        moved
    }

    fn own_entity(&self, issuer: PeerId) -> Result<EntityId, SessionError> {
        self.store
            .entity_of(issuer)
            .ok_or(SessionError::ForeignTarget { issuer })
    }
}
