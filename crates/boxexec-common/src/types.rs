//! Domain primitive types used across the boxexec workspace.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{RANDOM_SUFFIX_LENGTH, TIMEOUT_BUFFER};
use crate::error::{BoxexecError, Result};

/// Identifier of a container as assigned by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the command being executed.
///
/// Used only to name and label containers; carries no scheduling meaning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDetails {
    /// Command executor id.
    pub executor_id: i64,
    /// Chain executor id.
    pub chain_executor_id: i64,
    /// Command result id.
    pub result_id: i64,
}

/// A mount requested for the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Mount type, e.g. `bind`.
    #[serde(rename = "type", default)]
    pub mount_type: String,
    /// Host path.
    pub source: String,
    /// Path inside the container.
    pub destination: String,
    /// Mount options, e.g. `ro`.
    #[serde(default)]
    pub options: Vec<String>,
}

impl Mount {
    /// Returns whether the options contain the literal `ro` token.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|opt| opt == "ro")
    }
}

/// Absolute point in time after which a command is overdue.
///
/// Computed once as `now + timeout + TIMEOUT_BUFFER`; both a wall-clock
/// value (for the label) and a monotonic one (for waiting) are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: DateTime<Utc>,
    expires: Option<Instant>,
    expiration: Duration,
}

impl Deadline {
    /// Computes the deadline for a command with the given timeout, starting now.
    ///
    /// The command gets [`TIMEOUT_BUFFER`] on top of its timeout.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self::within(timeout.saturating_add(TIMEOUT_BUFFER))
    }

    /// Returns a deadline exactly `expiration` from now, without any buffer.
    #[must_use]
    pub fn within(expiration: Duration) -> Self {
        Self::starting_at(Utc::now(), Instant::now(), expiration)
    }

    fn starting_at(now: DateTime<Utc>, instant: Instant, expiration: Duration) -> Self {
        let at = TimeDelta::from_std(expiration)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            at,
            expires: instant.checked_add(expiration),
            expiration,
        }
    }

    /// Returns the wall-clock deadline.
    #[must_use]
    pub const fn at(&self) -> DateTime<Utc> {
        self.at
    }

    /// Returns the total lifetime granted, timeout plus buffer.
    #[must_use]
    pub const fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Returns the time left before the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.expires.map_or(Duration::MAX, |expires| {
            expires.saturating_duration_since(Instant::now())
        })
    }

    /// Formats the deadline the way it is stored in the deadline label.
    #[must_use]
    pub fn to_label(&self) -> String {
        format_timestamp(self.at)
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_label())
    }
}

/// Formats a timestamp as RFC 3339 with second precision and a `Z` suffix.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a deadline label value.
///
/// # Errors
///
/// Returns [`BoxexecError::Config`] if the value is not an RFC 3339 timestamp.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| BoxexecError::Config {
            message: format!("invalid deadline timestamp {value:?}: {e}"),
        })
}

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Returns a random alphanumeric string of [`RANDOM_SUFFIX_LENGTH`] characters.
#[must_use]
pub fn random_suffix() -> String {
    let mut bits = uuid::Uuid::new_v4().as_u128();
    let base = ALPHANUMERIC.len() as u128;
    (0..RANDOM_SUFFIX_LENGTH)
        .map(|_| {
            #[allow(clippy::cast_possible_truncation)]
            let idx = (bits % base) as usize;
            bits /= base;
            char::from(ALPHANUMERIC[idx])
        })
        .collect()
}
