//! Connection admission for the session
//!
//! Admission only looks at how many peers currently hold a color. It never
//! touches the pool itself, and the network layer asks for a decision before
//! any color is acquired for the connecting peer.

use shared::{AdmissionDecision, PROTOCOL_VERSION};

#[derive(Debug, Clone)]
pub struct AdmissionController {
    capacity: usize,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approves while fewer than `capacity` peers hold a color
    pub fn evaluate_connection(&self, assigned: usize) -> AdmissionDecision {
        if assigned >= self.capacity {
            return AdmissionDecision::reject(format!(
                "lobby full ({} players max)",
                self.capacity
            ));
        }
        AdmissionDecision::approve()
    }

    /// Rejects clients speaking a different protocol version
    pub fn check_version(&self, client_version: u32) -> Option<AdmissionDecision> {
        if client_version == PROTOCOL_VERSION {
            return None;
        }
        Some(AdmissionDecision::reject(format!(
            "protocol version mismatch (server {}, client {})",
            PROTOCOL_VERSION, client_version
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approves_below_capacity() {
        let admission = AdmissionController::new(6);
        for assigned in 0..6 {
            let decision = admission.evaluate_connection(assigned);
            assert!(decision.approved);
            assert!(decision.reason.is_none());
        }
    }

    #[test]
    fn test_rejects_at_capacity() {
        let admission = AdmissionController::new(6);
        let decision = admission.evaluate_connection(6);
        assert!(!decision.approved);
        assert_eq!(decision.reason.as_deref(), Some("lobby full (6 players max)"));
    }

    #[test]
    fn test_reason_names_configured_capacity() {
        let admission = AdmissionController::new(3);
        let decision = admission.evaluate_connection(3);
        assert_eq!(decision.reason.as_deref(), Some("lobby full (3 players max)"));
    }

    #[test]
    fn test_client_version_compatibility() {
        let admission = AdmissionController::new(6);
        assert!(admission.check_version(PROTOCOL_VERSION).is_none());

        let decision = admission.check_version(PROTOCOL_VERSION + 1).unwrap();
        assert!(!decision.approved);
        assert!(decision.reason.unwrap().contains("version mismatch"));
    }
}
