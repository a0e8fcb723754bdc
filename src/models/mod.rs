mod ipam;

pub use ipam::*;

/// Free-form tag map attached to VRFs, VPCs, and prefixes.
/// serde_json's default map keeps keys sorted, which the idempotency layer
/// relies on for reproducible parameter hashing.
pub type TagMap = serde_json::Map<String, serde_json::Value>;
