use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Longest domain prefix kept in a generated identity
const MAX_DOMAIN_LEN: usize = 48;

/// Names every artifact and the state of one execution.
///
/// Generated identities look like `example.com-20261016-1432-0007-3f9a1c2e`:
/// sanitized domain, timestamp, a process-wide sequence number and a random
/// suffix. The sequence alone keeps identities from one process distinct;
/// the random suffix covers separate processes sharing a working area.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunIdentity(String);

impl RunIdentity {
    pub fn generate(domain: &str) -> Self {
        let mut stem = sanitize_component(domain);
        stem.truncate(MAX_DOMAIN_LEN);
        if stem.is_empty() {
            stem.push_str("run");
        }
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let timestamp = Utc::now().format("%Y%m%d-%H%M");
        let random = uuid::Uuid::new_v4().simple().to_string();
        RunIdentity(format!("{stem}-{timestamp}-{seq:04}-{}", &random[..8]))
    }

    /// Wrap a caller-chosen token. Returns `None` for an empty token.
    pub fn from_token(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(RunIdentity(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RunIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Map arbitrary text onto the safe filename alphabet `[A-Za-z0-9._-]`.
///
/// Leading dots are dropped so the result can never be `.`/`..` or a
/// hidden file.
pub fn sanitize_component(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    mapped.trim_start_matches('.').to_string()
}
