//! Step Scheduler
//!
//! A deterministic virtual-time scheduler for testing concurrent async code:
//! - Operations are bound to logical steps and resumed strictly in
//!   (step, registration order), never by wall-clock timing
//! - Dependencies between operations (one awaiting another) resolve without
//!   busy-waiting or skipping ahead
//! - Observers record time-stamped logs of streams watched during a run
//! - An optional wall-clock timeout cancels runs that never settle

pub mod clock;
pub mod config;
mod engine;
pub mod error;
mod executor;
pub mod group;
pub mod materialize;
pub mod observer;
mod queue;
pub mod signal;


pub use clock::{ClockReader, Instant, Step, VirtualClock};
pub use config::GroupConfig;
pub use error::{BoxError, GroupError};
pub use executor::TaskOutcome;
pub use group::{create_group, create_observer_group, ObserverGroup, TaskGroup};
pub use materialize::{collect_until, materialize, Completion, Materialized};
pub use observer::{Event, ObserverId, ObserverLog};
pub use signal::{Signal, SignalOutcome, SignalWait};
