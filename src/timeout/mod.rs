//! Timeout scheduling
//!
//! Timer categories, all of which end in the engine's timeout handler:
//! - vote: coordinator missing votes
//! - response: participant missing a decision or an inquiry answer
//! - ack: coordinator missing acknowledgements
//! - respawn: automatic revival after a simulated crash
//! - grace: bounded wait before a recovered coordinator writes END

mod config;
mod scheduler;

pub use config::TimeoutConfig;
pub use scheduler::{TimeoutScheduler, TimerHandle, TimerKind};
