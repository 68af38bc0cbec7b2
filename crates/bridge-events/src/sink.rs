use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::BridgeEvent;
use crate::writer::{EventWriteError, EventWriter};

/// Channel buffer size used between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Flush the writer at most every this many seconds when the channel is idle.
const FLUSH_INTERVAL_SECS: u64 = 1;

/// A cheap, cloneable handle used to publish [`BridgeEvent`] values.
///
/// Publishing is one-way: producers never learn whether or when an event was
/// consumed.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<BridgeEvent>,
}

impl EventSink {
    /// Spawn a background task that appends every published event to the
    /// JSON-lines file at `path`.
    ///
    /// The task flushes after about a second without new events and once
    /// more when the last `EventSink` clone is dropped. I/O errors are logged
    /// and the offending event is skipped.
    pub async fn start(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), EventWriteError> {
        let (tx, rx) = mpsc::channel::<BridgeEvent>(CHANNEL_BUFFER);

        let mut writer = EventWriter::new(path).await?;

        let handle = tokio::spawn(async move {
            run_writer_loop(&mut writer, rx).await;
        });

        Ok((Self { tx }, handle))
    }

    /// Create a sink whose events are delivered to the returned receiver,
    /// for consumers living in the same process.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<BridgeEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    /// Publish an event.
    ///
    /// Waits for channel capacity if the consumer is behind. If the consumer
    /// has gone away the event is dropped and a warning is logged.
    pub async fn emit(&self, event: BridgeEvent) {
        if let Err(err) = self.tx.send(event).await {
            tracing::warn!(
                event_type = ?err.0.event_type,
                "event bus closed, event dropped"
            );
        }
    }
}

/// Drain the channel into the writer, flushing on idle and on close.
async fn run_writer_loop(writer: &mut EventWriter, mut rx: mpsc::Receiver<BridgeEvent>) {
    let flush_interval = tokio::time::Duration::from_secs(FLUSH_INTERVAL_SECS);
    let mut dirty = false;

    loop {
        match tokio::time::timeout(flush_interval, rx.recv()).await {
            Ok(Some(event)) => {
                if let Err(err) = writer.write(&event).await {
                    tracing::error!(%err, "failed to write event");
                } else {
                    dirty = true;
                }
            }
            Ok(None) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "failed to flush event log on shutdown");
                    }
                }
                tracing::debug!("event writer task shutting down");
                return;
            }
            Err(_) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "periodic event log flush failed");
                    } else {
                        dirty = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BridgeEventType, EventSource};

    fn sample(event_type: BridgeEventType) -> BridgeEvent {
        BridgeEvent::new(event_type, EventSource::new("test"), serde_json::json!({}))
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel(8);
        sink.emit(sample(BridgeEventType::SessionOpened)).await;
        sink.emit(sample(BridgeEventType::SessionClosed)).await;

        assert_eq!(rx.recv().await.unwrap().event_type, BridgeEventType::SessionOpened);
        assert_eq!(rx.recv().await.unwrap().event_type, BridgeEventType::SessionClosed);
    }

    #[tokio::test]
    async fn emit_after_receiver_dropped_does_not_panic() {
        let (sink, rx) = EventSink::channel(1);
        drop(rx);
        sink.emit(sample(BridgeEventType::SessionFailed)).await;
    }

    #[tokio::test]
    async fn file_sink_flushes_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let (sink, handle) = EventSink::start(&path).await.unwrap();
        sink.emit(sample(BridgeEventType::ProcessStarted)).await;
        sink.emit(sample(BridgeEventType::ProcessStopped)).await;
        drop(sink);
        handle.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("process-stopped"));
    }
}
