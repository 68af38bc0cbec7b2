use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::event::BridgeEvent;

/// Errors that can occur while persisting events.
#[derive(Debug, thiserror::Error)]
pub enum EventWriteError {
    #[error("failed to create parent directories: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open event log file: {0}")]
    OpenFile(std::io::Error),

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write to event log: {0}")]
    Write(std::io::Error),

    #[error("failed to flush event log: {0}")]
    Flush(std::io::Error),
}

/// Append-only file writer that serialises [`BridgeEvent`] values as
/// JSON-lines.
pub struct EventWriter {
    file: tokio::fs::File,
}

impl EventWriter {
    /// Open (or create) the event log at `path` in append mode, creating
    /// missing parent directories.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, EventWriteError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(EventWriteError::CreateDir)?;
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(EventWriteError::OpenFile)?;

        Ok(Self { file })
    }

    pub async fn write(&mut self, event: &BridgeEvent) -> Result<(), EventWriteError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        self.file
            .write_all(&line)
            .await
            .map_err(EventWriteError::Write)?;

        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), EventWriteError> {
        self.file.flush().await.map_err(EventWriteError::Flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BridgeEventType, EventSource};

    #[tokio::test]
    async fn writes_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");

        let mut writer = EventWriter::new(&path).await.unwrap();
        for _ in 0..2 {
            let event = BridgeEvent::new(
                BridgeEventType::SessionOpened,
                EventSource::new("test"),
                serde_json::json!({}),
            );
            writer.write(&event).await.unwrap();
        }
        writer.flush().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["event_type"], "session-opened");
        }
    }
}
