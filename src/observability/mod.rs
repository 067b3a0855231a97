//! Observability for a twopc node
//!
//! - Structured logging (JSON lines)
//! - Protocol counters
//! - Typed protocol events
//!
//! Observability never feeds back into protocol decisions.
//!
//! # Usage
//!
//! ```ignore
//! use twopc::observability::{log_event, Event};
//!
//! log_event(Event::DecisionWritten, &[("session", "s1"), ("decision", "COMMIT")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log an event at its own severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        // This just verifies no panic
        log_event(Event::BootStart, &[]);
        log_event(Event::ConfigLoaded, &[("data_dir", "/tmp/test")]);
    }
}
