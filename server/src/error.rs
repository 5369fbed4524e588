use shared::{EntityId, PeerId};
use thiserror::Error;

/// Failures of a session operation. None of them are fatal to the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("connection rejected: {0}")]
    AdmissionRejected(String),

    #[error("no free color left for peer {peer}")]
    PoolExhausted { peer: PeerId },

    #[error("peer {0} is not connected")]
    UnknownPeer(PeerId),

    #[error("peer {0} is already connected")]
    AlreadyConnected(PeerId),

    #[error("request from peer {issuer} rejected: no entity of its own to act on")]
    ForeignTarget { issuer: PeerId },

    #[error(transparent)]
    Replication(#[from] ReplicationError),
}

/// Failures of a replicated field write
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    #[error("entity {0} does not exist")]
    UnknownEntity(EntityId),

    #[error("{writer} may not write the {field} field of entity {entity}")]
    CapabilityDenied {
        field: &'static str,
        entity: EntityId,
        writer: String,
    },
}

/// Invalid session configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("color palette must not be empty")]
    EmptyPalette,

    #[error("color palette lists {0} more than once")]
    DuplicateColor(shared::Color),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_formatting() {
        let err = SessionError::AdmissionRejected("lobby full (6 players max)".to_string());
        assert_eq!(err.to_string(), "connection rejected: lobby full (6 players max)");

        let err = SessionError::PoolExhausted { peer: 3 };
        assert_eq!(err.to_string(), "no free color left for peer 3");

        let err = ConfigError::DuplicateColor(shared::Color::Cyan);
        assert_eq!(err.to_string(), "color palette lists cyan more than once");
    }

    #[test]
    fn test_replication_error_is_transparent() {
        let err: SessionError = ReplicationError::UnknownEntity(12).into();
        assert_eq!(err.to_string(), "entity 12 does not exist");
    }
}
