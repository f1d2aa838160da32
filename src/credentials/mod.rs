//! Per-subject OAuth credential persistence.
//!
//! The [`CredentialStore`] trait is the user-data store seen by the token
//! manager. Two implementations ship:
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │ SqliteCredentialStore        │   │ MemoryCredentialStore        │
//! │  - AES-256-GCM sealed tokens │   │  - process lifetime only     │
//! │  - survives restarts         │   │  - tests, ephemeral setups   │
//! └──────────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! Every mutation is written through immediately; there is no buffering.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

mod encryption;
mod memory;
mod storage;

pub use encryption::{Sealed, TokenCipher};
pub use memory::MemoryCredentialStore;
pub use storage::SqliteCredentialStore;

/// OAuth credential held for one subject.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub subject_id: String,

    /// Bearer token for upstream calls
    pub access_token: String,

    /// Used to mint new access tokens; absent for non-refreshable grants
    pub refresh_token: Option<String>,

    /// Absolute expiry of the access token; `None` means it does not expire
    pub expires_at: Option<DateTime<Utc>>,

    pub scopes: BTreeSet<String>,
}

impl Credential {
    /// True when the access token expires at or before `now + skew`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + skew,
            None => false,
        }
    }

    /// Secret-free summary for status endpoints.
    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            subject_id: self.subject_id.clone(),
            expires_at: self.expires_at,
            refreshable: self.refresh_token.is_some(),
            scopes: self.scopes.iter().cloned().collect(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("subject_id", &self.subject_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CredentialSummary {
    pub subject_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub refreshable: bool,
    pub scopes: Vec<String>,
}

/// Parse a space-delimited OAuth `scope` string.
pub fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

/// Durable credential storage keyed by subject.
///
/// Implementations must make each call atomic on its own; serialization of
/// read-modify-write sequences is the token manager's job.
pub trait CredentialStore: Send + Sync {
    fn get(&self, subject_id: &str) -> Result<Option<Credential>>;

    /// Insert or replace the credential for `credential.subject_id`.
    fn upsert(&self, credential: &Credential) -> Result<()>;

    /// Returns whether a credential existed.
    fn delete(&self, subject_id: &str) -> Result<bool>;
}
