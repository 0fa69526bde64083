//! Error types for the Deadswitch engine.
//!
//! Nothing in the engine is fatal to its host: store failures degrade to
//! defaults, network failures are logged, and check-in preconditions come back
//! as [`CheckInRejection`] values carrying a user-facing reason. Host commands
//! against the engine report through [`EngineError`].
//! Startup glue in the binaries uses `anyhow` on top of these.

use chrono::Duration;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the persistent key-value store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to access store entry at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode '{key}': {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a check-in was refused. State is never mutated by a rejected check-in.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckInRejection {
    /// Less than the cooldown has passed since the last check-in.
    #[error("cooldown active, {} hours remaining", whole_hours_up(.remaining))]
    CooldownActive { remaining: Duration },

    /// A manual check-in already happened on this calendar day.
    #[error("already checked in today")]
    AlreadyCheckedInToday,
}

/// Failures of a host command against a running engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    CheckIn(#[from] CheckInRejection),

    #[error("no contact with that id")]
    UnknownContact,

    #[error("no device with that id")]
    UnknownDevice,
}

/// Rounds a positive duration up to whole hours, so "5h59m left" reads as 6.
fn whole_hours_up(remaining: &Duration) -> i64 {
    let seconds = remaining.num_seconds().max(0);
    (seconds + 3599) / 3600
}
