//! Admission: the gate chain and the state it reads and writes

pub mod aggregation;
pub mod burst;
pub mod dedup;
pub mod event;
pub mod gates;
pub mod quiet_hours;
pub mod quota;
pub mod store;
pub mod token_bucket;

pub use event::{Event, OccurrenceCounter};
pub use gates::{Gate, GateChain, GateContext, GateVerdict};
pub use quiet_hours::QuietHours;
pub use quota::{PeriodUsage, QuotaCounters, QuotaPeriod};
pub use store::{AdmissionStore, GlobalState, TypeState};
pub use token_bucket::{BucketSnapshot, TokenBucket};
