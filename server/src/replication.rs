//! Authoritative replicated entity state
//!
//! Each entity owned by a peer carries two replicated fields, its position and
//! its color. The server holds the only authoritative copy of both. A field
//! write has to present the capability the field kind demands:
//!
//! - `PositionField` is written with an `OwnerAuthority` for the entity's owner,
//!   minted by the request gateway once it has bound a request to its sender
//! - `ColorField` is written with a `ServerAuthority`, which only session code
//!   inside this crate can create
//!
//! A committed write bumps the field's sequence number, runs the observers
//! registered for that entity/field pair, and queues one independent delivery
//! per connected peer. Deliveries are fire-and-forget. Peers use the per-field
//! sequence to apply updates for the same field in commit order; nothing is
//! promised across fields or entities.

use crate::error::ReplicationError;
use log::{debug, info};
use shared::{Color, EntityId, Notification, PeerId, Vec3};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

/// One notification addressed to one peer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub peer: PeerId,
    pub notification: Notification,
}

/// Outbound queue for replicated state changes
pub trait DeliverySink: Send + Sync {
    /// Queues a delivery without waiting on the peer
    fn deliver(&self, delivery: Delivery);
}

impl<M> DeliverySink for mpsc::UnboundedSender<M>
where
    M: From<Delivery> + Send,
{
    fn deliver(&self, delivery: Delivery) {
        let peer = delivery.peer;
        if self.send(M::from(delivery)).is_err() {
            debug!("Outbound queue closed, update for peer {} dropped", peer);
        }
    }
}

/// Permission to write a replicated field
pub trait WriteCapability {
    /// True if this capability may write fields of an entity owned by `owner`
    fn permits(&self, owner: PeerId) -> bool;

    fn describe(&self) -> String;
}

/// Write permission held only by the server session
#[derive(Debug)]
pub struct ServerAuthority {
    _private: (),
}

impl ServerAuthority {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

impl WriteCapability for ServerAuthority {
    fn permits(&self, _owner: PeerId) -> bool {
        true
    }

    fn describe(&self) -> String {
        "server".to_string()
    }
}

/// Write permission on behalf of one peer, limited to entities it owns
#[derive(Debug)]
pub struct OwnerAuthority {
    peer: PeerId,
}

impl OwnerAuthority {
    pub(crate) fn new(peer: PeerId) -> Self {
        Self { peer }
    }
}

impl WriteCapability for OwnerAuthority {
    fn permits(&self, owner: PeerId) -> bool {
        owner == self.peer
    }

    fn describe(&self) -> String {
        format!("peer {}", self.peer)
    }
}

/// Callback run synchronously after a commit to one entity's field
pub type Observer<T> = Box<dyn FnMut(EntityId, &T) + Send + Sync>;

/// A server-authoritative register with last-writer-wins semantics
pub struct ReplicatedField<T> {
    value: Option<T>,
    seq: u32,
    observers: Vec<Observer<T>>,
}

impl<T: Copy> ReplicatedField<T> {
    fn new() -> Self {
        Self {
            value: None,
            seq: 0,
            observers: Vec::new(),
        }
    }

    /// Latest committed value, `None` before the first write
    pub fn value(&self) -> Option<T> {
        self.value
    }

    /// Number of commits so far
    pub fn seq(&self) -> u32 {
        self.seq
    }

    fn commit(&mut self, entity: EntityId, value: T) -> u32 {
        self.value = Some(value);
        self.seq = self.seq.wrapping_add(1);
        for observer in &mut self.observers {
            observer(entity, &value);
        }
        self.seq
    }
}

/// Selects one replicated field of an entity and the capability writing it takes
pub trait FieldKind {
    type Value: Copy;
    type Writer: WriteCapability;

    const NAME: &'static str;

    fn field(record: &EntityRecord) -> &ReplicatedField<Self::Value>;

    fn field_mut(record: &mut EntityRecord) -> &mut ReplicatedField<Self::Value>;

    fn notification(entity: EntityId, value: Self::Value, seq: u32) -> Notification;
}

/// Position on the play plane, written on the owner's request
pub struct PositionField;

impl FieldKind for PositionField {
    type Value = Vec3;
    type Writer = OwnerAuthority;

    const NAME: &'static str = "position";

    fn field(record: &EntityRecord) -> &ReplicatedField<Vec3> {
        &record.position
    }

    fn field_mut(record: &mut EntityRecord) -> &mut ReplicatedField<Vec3> {
        &mut record.position
    }

    fn notification(entity: EntityId, position: Vec3, seq: u32) -> Notification {
        Notification::EntityPositionChanged {
            entity,
            position,
            seq,
        }
    }
}

/// Assigned color, written by the server only
pub struct ColorField;

impl FieldKind for ColorField {
    type Value = Color;
    type Writer = ServerAuthority;

    const NAME: &'static str = "color";

    fn field(record: &EntityRecord) -> &ReplicatedField<Color> {
        &record.color
    }

    fn field_mut(record: &mut EntityRecord) -> &mut ReplicatedField<Color> {
        &mut record.color
    }

    fn notification(entity: EntityId, color: Color, seq: u32) -> Notification {
        Notification::EntityColorChanged { entity, color, seq }
    }
}

/// Authoritative state of one peer's entity
pub struct EntityRecord {
    id: EntityId,
    owner: PeerId,
    position: ReplicatedField<Vec3>,
    color: ReplicatedField<Color>,
}

impl EntityRecord {
    fn new(id: EntityId, owner: PeerId) -> Self {
        Self {
            id,
            owner,
            position: ReplicatedField::new(),
            color: ReplicatedField::new(),
        }
    }

    pub fn owner(&self) -> PeerId {
        self.owner
    }

    /// Full state of the entity, as sent to a peer that has not seen it yet
    pub fn snapshot(&self) -> Notification {
        Notification::EntitySpawned {
            entity: self.id,
            owner: self.owner,
            position: self.position.value(),
            position_seq: self.position.seq(),
            color: self.color.value(),
            color_seq: self.color.seq(),
        }
    }
}

pub struct ReplicatedStateStore {
    entities: BTreeMap<EntityId, EntityRecord>,
    owned: HashMap<PeerId, EntityId>,
    next_entity_id: EntityId,
    sink: Box<dyn DeliverySink>,
}

impl ReplicatedStateStore {
    pub fn new(sink: impl DeliverySink + 'static) -> Self {
        Self {
            entities: BTreeMap::new(),
            owned: HashMap::new(),
            next_entity_id: 1,
            sink: Box::new(sink),
        }
    }

    /// Creates the entity owned by `owner`
    ///
    /// The new owner first receives a snapshot of every existing entity, then
    /// all connected peers (the owner included) learn about the new one. A peer
    /// that already owns an entity keeps it.
    pub fn spawn(&mut self, owner: PeerId) -> EntityId {
        if let Some(existing) = self.owned.get(&owner) {
            debug!("Peer {} already owns entity {}", owner, existing);
            return *existing;
        }

        for record in self.entities.values() {
            self.sink.deliver(Delivery {
                peer: owner,
                notification: record.snapshot(),
            });
        }

        let id = self.next_entity_id;
        self.next_entity_id += 1;

        let record = EntityRecord::new(id, owner);
        let snapshot = record.snapshot();
        self.entities.insert(id, record);
        self.owned.insert(owner, id);

        info!("Spawned entity {} for peer {}", id, owner);
        self.broadcast(&snapshot);
        id
    }

    /// Removes the entity owned by `owner` and tells the remaining peers
    pub fn despawn(&mut self, owner: PeerId) -> Option<EntityId> {
        let id = self.owned.remove(&owner)?;
        self.entities.remove(&id);

        info!("Despawned entity {} of peer {}", id, owner);
        self.broadcast(&Notification::EntityDespawned { entity: id });
        Some(id)
    }

    pub fn entity_of(&self, owner: PeerId) -> Option<EntityId> {
        self.owned.get(&owner).copied()
    }

    pub fn owner_of(&self, entity: EntityId) -> Option<PeerId> {
        self.entities.get(&entity).map(EntityRecord::owner)
    }

    /// Latest committed value of a field
    pub fn read<F: FieldKind>(&self, entity: EntityId) -> Option<F::Value> {
        self.entities
            .get(&entity)
            .and_then(|record| F::field(record).value())
    }

    /// Commit sequence of a field
    pub fn seq<F: FieldKind>(&self, entity: EntityId) -> Option<u32> {
        self.entities
            .get(&entity)
            .map(|record| F::field(record).seq())
    }

    /// Commits `value` to a field and propagates it to every connected peer
    ///
    /// Returns the new field sequence. Fails without side effects if the entity
    /// is unknown or the writer's capability does not cover its owner.
    pub fn write<F: FieldKind>(
        &mut self,
        writer: &F::Writer,
        entity: EntityId,
        value: F::Value,
    ) -> Result<u32, ReplicationError> {
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(ReplicationError::UnknownEntity(entity))?;

        if !writer.permits(record.owner) {
            return Err(ReplicationError::CapabilityDenied {
                field: F::NAME,
                entity,
                writer: writer.describe(),
            });
        }

        let seq = F::field_mut(record).commit(entity, value);
        self.broadcast(&F::notification(entity, value, seq));
        Ok(seq)
    }

    /// Registers an observer for one entity/field pair
    pub fn observe<F: FieldKind>(
        &mut self,
        entity: EntityId,
        observer: Observer<F::Value>,
    ) -> Result<(), ReplicationError> {
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(ReplicationError::UnknownEntity(entity))?;
        F::field_mut(record).observers.push(observer);
        Ok(())
    }

    /// Owners of all live entities, ordered by entity id
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.entities.values().map(EntityRecord::owner).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn broadcast(&self, notification: &Notification) {
        for record in self.entities.values() {
            self.sink.deliver(Delivery {
                peer: record.owner,
                notification: notification.clone(),
            });
        }
    }
}
