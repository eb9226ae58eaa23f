//! Identifiers for model objects.

use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier carried by every model object that outlives a function
/// call: builds, build sets, queue items, node requests, bundles.
///
/// UUIDv7 underneath, so ids sort by creation time wherever they end up
/// as keys (status export, external storage, logs).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
pub struct ModelId(Uuid);

impl ModelId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// First eight hex digits, for compact log fields.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new()
    }
}

/// Ids round-trip through their display form, so references arriving
/// from status consumers or event payloads parse back.
impl FromStr for ModelId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ModelId::new(), ModelId::new());
    }

    #[test]
    fn test_display_round_trip() {
        let id = ModelId::new();
        let parsed: ModelId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short(), id.to_string()[..8]);
        assert!("not-an-id".parse::<ModelId>().is_err());
    }
}
