//! # Deadswitch
//!
//! An event-driven survival-confirmation engine: a dead-man's switch for Rust.
//!
//! A user proves they are alive by checking in, by hand or through signals from
//! a paired wearable. If they stop, the protocol escalates in two stages: first
//! their emergency contacts are warned, then a stored memo is released to their
//! asset-liaison contacts. A remote switch service mirrors the deadline so the
//! escalation still happens if the device itself goes dark.
//!
//! ## Core Concepts
//!
//! - **SystemClock**: a fixed-cadence ticker that decides when the protocol is
//!   evaluated. What time it *is* comes from a separate, injectable `Clock`.
//! - **Level-triggered protocol**: on every tick the phase (`Monitoring`,
//!   `Warning`, `Executed`) is derived from scratch from the last check-in, so a
//!   restart lands on the same phase it left.
//! - **Effects, not side effects**: the `Controller` answers every input with a
//!   list of `Effect`s. The `SwitchEngine` performs them (persist, journal,
//!   notify, sync) before it looks at the next input.
//! - **Event-Driven**: subscribers observe strongly-typed `SwitchEvent`s and a
//!   watched `StatusSnapshot` instead of reaching into engine state.
//! - **Configuration-Driven**: cadence, protocol constants, calendar timezone
//!   and the remote endpoint come from a `SwitchConfig`, often loaded from a
//!   file.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use deadswitch::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // 1. Create a default configuration and an in-memory store.
//!     let config = SwitchConfig::default();
//!     let store = StateStore::new(MemoryStore::new());
//!
//!     // 2. Create the engine.
//!     let engine = SwitchEngine::builder(config, store).build();
//!
//!     // 3. Subscribe to an event stream before starting the engine.
//!     let mut events = engine.subscribe_switch_events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Received Switch Event: {:?}", event);
//!         }
//!     });
//!
//!     // 4. Run the engine. It will shut down on Ctrl+C.
//!     engine.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Deadswitch Engine";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Declare all the modules in the crate.
pub mod common;
pub mod components;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod journal;
pub mod model;
pub mod notifier;
pub mod registry;
pub mod remote;
pub mod sensor;
pub mod store;
pub mod time;

/// A prelude module for easy importing of the most common Deadswitch types.
pub mod prelude {
    pub use crate::common::{ContactId, DeviceId};
    pub use crate::config::{ClockResolution, SwitchConfig};
    pub use crate::controller::{Controller, StatusSnapshot};
    pub use crate::engine::SwitchEngine;
    pub use crate::error::{CheckInRejection, EngineError};
    pub use crate::events::{CheckInSource, SwitchEvent, SystemEvent};
    pub use crate::model::{
        ConnectionState, Contact, ContactRole, Device, DeviceKind, HealthSample, Phase,
        SettingsPatch,
    };
    pub use crate::store::{FileStore, MemoryStore, StateStore};
}

impl Default for config::SwitchConfig {
    fn default() -> Self {
        Self {
            resolution: config::ClockResolution::Display,
            protocol: config::ProtocolConfig::default(),
            calendar: config::CalendarConfig::default(),
            sensor: config::SensorConfig::default(),
            cloud: config::CloudConfig::default(),
            storage: config::StorageConfig::default(),
        }
    }
}
