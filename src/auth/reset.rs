use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use super::repo_types::ResetTicket;
use crate::config::ResetConfig;

const SECRET_BYTES: usize = 32;

/// One-way digest stored in place of a reset secret.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Issues single-use reset secrets. Independent of the bearer-token key.
#[derive(Debug, Clone)]
pub struct ResetPolicy {
    ttl: Duration,
}

impl ResetPolicy {
    pub fn new(cfg: &ResetConfig) -> Self {
        Self {
            ttl: Duration::minutes(cfg.ttl_minutes),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the plaintext secret for delivery and the ticket to persist.
    pub fn issue(&self, now: OffsetDateTime) -> (String, ResetTicket) {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let secret = hex::encode(bytes);
        let ticket = ResetTicket {
            token_hash: hash_secret(&secret),
            expires_at: now + self.ttl,
        };
        (secret, ticket)
    }
}
