//! Peer-side replicas of the server's entities
//!
//! Updates travel over UDP and may arrive out of order. Each replicated field
//! remembers the sequence of the last commit it applied and ignores anything
//! older, so same-field updates take effect in the order the server committed
//! them. Updates for an entity whose spawn has not arrived yet are held back
//! and merged into the entity when the spawn lands, through the same check.

use shared::{Color, EntityId, Notification, PeerId, Vec3};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicaField<T> {
    value: Option<T>,
    seq: u32,
}

impl<T: Copy> ReplicaField<T> {
    fn new(value: Option<T>, seq: u32) -> Self {
        Self { value, seq }
    }

    pub fn value(&self) -> Option<T> {
        self.value
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Applies a committed value unless a newer one is already held
    fn apply(&mut self, value: Option<T>, seq: u32) -> bool {
        if seq <= self.seq {
            return false;
        }
        self.value = value;
        self.seq = seq;
        true
    }
}

/// Field updates that arrived before their entity's spawn
#[derive(Debug)]
struct PendingFields {
    position: ReplicaField<Vec3>,
    color: ReplicaField<Color>,
}

impl PendingFields {
    fn new() -> Self {
        Self {
            position: ReplicaField::new(None, 0),
            color: ReplicaField::new(None, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaEntity {
    pub id: EntityId,
    pub owner: PeerId,
    position: ReplicaField<Vec3>,
    color: ReplicaField<Color>,
}

impl ReplicaEntity {
    pub fn position(&self) -> Option<Vec3> {
        self.position.value()
    }

    pub fn color(&self) -> Option<Color> {
        self.color.value()
    }

    pub fn color_seq(&self) -> u32 {
        self.color.seq()
    }
}

/// What a notification changed in the local replica
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaChange {
    Spawned { entity: EntityId, owner: PeerId },
    Despawned { entity: EntityId },
    Moved { entity: EntityId, position: Vec3 },
    Recolored { entity: EntityId, color: Color },
}

#[derive(Debug, Default)]
pub struct ReplicaWorld {
    entities: BTreeMap<EntityId, ReplicaEntity>,
    pending: BTreeMap<EntityId, PendingFields>,
    local_peer: Option<PeerId>,
}

impl ReplicaWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local_peer(&mut self, peer: Option<PeerId>) {
        self.local_peer = peer;
    }

    pub fn local_peer(&self) -> Option<PeerId> {
        self.local_peer
    }

    /// The entity owned by this client, once its spawn has arrived
    pub fn local_entity(&self) -> Option<&ReplicaEntity> {
        let peer = self.local_peer?;
        self.entities.values().find(|entity| entity.owner == peer)
    }

    pub fn get(&self, entity: EntityId) -> Option<&ReplicaEntity> {
        self.entities.get(&entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = &ReplicaEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.pending.clear();
        self.local_peer = None;
    }

    /// Applies a server notification, returning what visibly changed
    pub fn apply(&mut self, notification: Notification) -> Option<ReplicaChange> {
        match notification {
            Notification::EntitySpawned {
                entity,
                owner,
                position,
                position_seq,
                color,
                color_seq,
            } => {
                if let Some(existing) = self.entities.get_mut(&entity) {
                    existing.position.apply(position, position_seq);
                    existing.color.apply(color, color_seq);
                    return None;
                }

                let mut replica = ReplicaEntity {
                    id: entity,
                    owner,
                    position: ReplicaField::new(position, position_seq),
                    color: ReplicaField::new(color, color_seq),
                };
                if let Some(early) = self.pending.remove(&entity) {
                    replica.position.apply(early.position.value, early.position.seq);
                    replica.color.apply(early.color.value, early.color.seq);
                }
                self.entities.insert(entity, replica);
                Some(ReplicaChange::Spawned { entity, owner })
            }
            Notification::EntityDespawned { entity } => {
                self.pending.remove(&entity);
                self.entities
                    .remove(&entity)
                    .map(|_| ReplicaChange::Despawned { entity })
            }
            Notification::EntityPositionChanged {
                entity,
                position,
                seq,
            } => {
                let Some(replica) = self.entities.get_mut(&entity) else {
                    self.pending
                        .entry(entity)
                        .or_insert_with(PendingFields::new)
                        .position
                        .apply(Some(position), seq);
                    return None;
                };
                replica
                    .position
                    .apply(Some(position), seq)
                    .then_some(ReplicaChange::Moved { entity, position })
            }
            Notification::EntityColorChanged { entity, color, seq } => {
                let Some(replica) = self.entities.get_mut(&entity) else {
                    self.pending
                        .entry(entity)
                        .or_insert_with(PendingFields::new)
                        .color
                        .apply(Some(color), seq);
                    return None;
                };
                replica
                    .color
                    .apply(Some(color), seq)
                    .then_some(ReplicaChange::Recolored { entity, color })
            }
        }
    }
}
