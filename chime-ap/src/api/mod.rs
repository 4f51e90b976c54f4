//! HTTP API for event submission, status and the audit stream

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, run, AppContext};
