//! Identifier types used throughout the Stockpile core.
//!
//! Queue entries use UUID v7 for time-ordered, globally unique identifiers.
//! Records written while offline get a human-readable local id of the form
//! `<prefix>_<millis>_<random>`, which is reused as the remote document key.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Timestamp;

/// Unique identifier for a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Creates a new operation ID with the current timestamp.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses an operation ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Generator for client-side record identifiers.
pub struct LocalId;

impl LocalId {
    /// Length of the random suffix.
    pub const SUFFIX_LEN: usize = 9;

    /// Generates `<prefix>_<millis>_<random>`, e.g. `txn_1718000000000_k3j9x0a2b`.
    #[must_use]
    pub fn generate(prefix: &str, at: Timestamp) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        format!("{prefix}_{}_{suffix}", at.as_millis())
    }

    /// Returns true if `id` was produced by [`LocalId::generate`] with `prefix`.
    #[must_use]
    pub fn is_local(prefix: &str, id: &str) -> bool {
        let Some(rest) = id.strip_prefix(prefix).and_then(|r| r.strip_prefix('_')) else {
            return false;
        };
        let mut parts = rest.splitn(2, '_');
        let millis_ok = parts
            .next()
            .is_some_and(|m| !m.is_empty() && m.bytes().all(|b| b.is_ascii_digit()));
        let suffix_ok = parts.next().is_some_and(|s| {
            s.len() == Self::SUFFIX_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
        });
        millis_ok && suffix_ok
    }
}
