//! Contains the building blocks of the survival-confirmation protocol.
//!
//! Most of these are pure: they take the current status, settings and time and
//! return a decision or a list of effects. The `Controller` composes them into
//! a single transition function, and the `SwitchEngine` drives it. Only
//! `sync` touches the outside world, and only by spawning.

pub mod autocheckin;
pub mod checkin;
pub mod deadline;
pub mod debounce;
pub mod prewarning;
pub mod protocol;
pub mod sync;
