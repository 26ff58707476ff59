// file: src/installer/token.rs
// version: 1.0.0
// guid: 8527cb67-43e3-471e-8fc9-b672aced7d79

//! Cluster join token

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

const TOKEN_BYTES: usize = 32;

/// Shared secret a node presents when joining the control plane
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// 32 random bytes, hex-encoded. Falls back to a timestamp-derived value if the
    /// system RNG is unavailable.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        match OsRng.try_fill_bytes(&mut bytes) {
            Ok(()) => Self(hex::encode(bytes)),
            Err(e) => {
                warn!("System RNG unavailable ({}), using timestamp token", e);
                Self::from_timestamp()
            }
        }
    }

    fn from_timestamp() -> Self {
        let now = chrono::Utc::now();
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
        Self(format!("{:064x}", nanos as u128))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value.trim().to_string())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(<redacted>)")
    }
}
