//! Playback: scheduling queue, dispatcher and executor collaborators

pub mod dispatcher;
pub mod executor;
pub mod queue;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use executor::{CommandPlayer, FileResolver, PlaybackExecutor, SoundResolver};
pub use queue::{EnqueueResult, PlaybackQueue, QueueItem, QueueSnapshot};
