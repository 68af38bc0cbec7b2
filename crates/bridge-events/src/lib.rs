//! Structured lifecycle events and a one-way event bus for the loopback
//! bridge.
//!
//! Components publish [`BridgeEvent`] values through a cloneable
//! [`EventSink`]. The sink either feeds an in-process receiver or a
//! background task that appends each event as a single JSON object to a
//! [JSON Lines](https://jsonlines.org/) file.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use bridge_events::{BridgeEvent, BridgeEventType, EventSink, EventSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = EventSink::start("/var/log/loopback-bridge/events.jsonl").await?;
//!
//! sink.emit(BridgeEvent::new(
//!     BridgeEventType::ProcessStarted,
//!     EventSource::new("loopback-bridge"),
//!     serde_json::json!({"version": "0.1.0"}),
//! ))
//! .await;
//! # Ok(())
//! # }
//! ```

pub mod event;
pub mod sink;
pub mod writer;

pub use event::{BridgeEvent, BridgeEventType, EventSource};
pub use sink::EventSink;
pub use writer::{EventWriteError, EventWriter};
