//! # Chime admission and playback (chime-ap)
//!
//! Decides, for every inbound notification event, whether it may produce
//! sound now, merges or delays it relative to other pending events, and
//! plays admitted events one at a time in priority order.
//!
//! **Architecture:** concurrent submitters run a fixed gate chain against
//! sharded per-event-type state, admitted events enter a bounded priority
//! queue, and a single worker drains the queue through an external player.

pub mod admission;
pub mod api;
pub mod client;
pub mod db;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod playback;
pub mod status;
pub mod worker;

pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use status::StatusSnapshot;
pub use worker::PipelineHandle;
