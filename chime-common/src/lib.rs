//! # Chime Common Library
//!
//! Shared code for the chime notification-sound daemon and its clients:
//! - Event wire types (NotificationEvent, Priority, SubmitOutcome)
//! - Audit records and the AuditBus
//! - Configuration loading and validation
//! - Clock abstraction (monotonic + wall time)

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{NotificationEvent, Priority, SubmitOutcome};
