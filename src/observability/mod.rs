//! Observability for docpipe
//!
//! Structured JSON logging of typed events. Observability is read-only: it
//! never changes what a translation or a read produces.
//!
//! ```ignore
//! use docpipe::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::TranslationStart, &[("collection", "orders")]);
//! ```

mod events;
mod logger;

pub use events::Event;
pub use logger::{Logger, Severity};

#[cfg(test)]
pub(crate) use logger::capture_log;

/// Log a typed event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a typed event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
