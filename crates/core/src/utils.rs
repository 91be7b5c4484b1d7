//! Utility functions

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One whole token in base units (18 decimals)
pub const TOKEN_UNIT: u128 = 1_000_000_000_000_000_000;

/// Get the current timestamp in seconds
pub fn timestamp_secs() -> u64 {
    let start = SystemTime::now();
    let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or(Duration::from_secs(0));
    since_epoch.as_secs()
}

/// Express a whole-token amount in base units
pub fn tokens(whole: u128) -> u128 {
    whole.saturating_mul(TOKEN_UNIT)
}

/// Serde adapter writing byte strings as `0x`-prefixed hex
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}
