//! shoter-game — Game-side coordination.
//!
//! The [`ShotController`] admits one shot at a time, runs the photo pipeline
//! off the async runtime, calls the identification endpoint and publishes the
//! outcome as an immutable [`GameSnapshot`]. [`Registration`] collects the four
//! per-angle photos a new player profile needs.

pub mod config;
pub mod controller;
pub mod registration;
pub mod state;

pub use config::Config;
pub use controller::ShotController;
pub use registration::{Registration, RegistrationError};
pub use state::{reduce, GameEvent, GameSnapshot, OutcomeKind, ShotOutcome, ShotState};
