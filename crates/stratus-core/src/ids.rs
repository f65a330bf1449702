//! Id generation and wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Fresh launch id.
pub fn new_launch_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fresh node id.
pub fn new_node_id() -> String {
    Uuid::new_v4().to_string()
}

/// Short nonce used to disambiguate append-only record keys.
pub fn new_nonce() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_launch_id(), new_launch_id());
        assert_ne!(new_node_id(), new_node_id());
        assert_ne!(new_nonce(), new_nonce());
    }

    #[test]
    fn nonce_is_short_and_keyable() {
        let nonce = new_nonce();
        assert_eq!(nonce.len(), 8);
        assert!(!nonce.contains('|'));
    }

    #[test]
    fn epoch_millis_is_reasonable() {
        // After 2024-01-01.
        assert!(epoch_millis() > 1_704_067_200_000);
    }
}
