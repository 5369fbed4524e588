use serde::{Deserialize, Serialize};
use std::fmt;

pub type PeerId = u32;
pub type EntityId = u32;

pub const PROTOCOL_VERSION: u32 = 1;
pub const PLANE_HALF_EXTENT: f32 = 3.0;
pub const PLANE_HEIGHT: f32 = 1.0;

/// Colors handed out by the server, in the order a fresh pool pops them.
pub const MASTER_COLORS: [Color; 6] = [
    Color::Red,
    Color::Blue,
    Color::Green,
    Color::Yellow,
    Color::Magenta,
    Color::Cyan,
];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Red,
    Blue,
    Green,
    Yellow,
    Magenta,
    Cyan,
}

impl Color {
    pub fn name(&self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Blue => "blue",
            Color::Green => "green",
            Color::Yellow => "yellow",
            Color::Magenta => "magenta",
            Color::Cyan => "cyan",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// True if the point lies on the square play plane entities are placed on.
    pub fn is_on_plane(&self) -> bool {
        self.y == PLANE_HEIGHT
            && (-PLANE_HALF_EXTENT..=PLANE_HALF_EXTENT).contains(&self.x)
            && (-PLANE_HALF_EXTENT..=PLANE_HALF_EXTENT).contains(&self.z)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Outcome of a connection attempt
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub approved: bool,
    pub reason: Option<String>,
}

impl AdmissionDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

/// Replicated state changes pushed from the server to every connected peer.
///
/// Field updates carry the per-field commit sequence so a peer can discard
/// an update that arrives after a newer one for the same field.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Notification {
    EntitySpawned {
        entity: EntityId,
        owner: PeerId,
        position: Option<Vec3>,
        position_seq: u32,
        color: Option<Color>,
        color_seq: u32,
    },
    EntityDespawned {
        entity: EntityId,
    },
    EntityPositionChanged {
        entity: EntityId,
        position: Vec3,
        seq: u32,
    },
    EntityColorChanged {
        entity: EntityId,
        color: Color,
        seq: u32,
    },
}

impl Notification {
    pub fn entity(&self) -> EntityId {
        match self {
            Notification::EntitySpawned { entity, .. }
            | Notification::EntityDespawned { entity }
            | Notification::EntityPositionChanged { entity, .. }
            | Notification::EntityColorChanged { entity, .. } => *entity,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    MoveRequest,
    ColorChangeRequest,
    Heartbeat,
    Disconnect,

    Admission {
        decision: AdmissionDecision,
        peer_id: Option<PeerId>,
    },
    Notify(Notification),
}
