//! Event logger - JSONL file sink for the event bus
//!
//! Subscribes to the bus and appends one JSON line per event. When the
//! subscriber lags, a single `bus.dropped` diagnostic line is written with
//! the number of missed events.

use std::path::PathBuf;

use eyre::{Context, Result};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::bus::EventBus;
use super::types::{Event, EventKind};

/// Spawn a background task that mirrors the bus into a JSONL file
///
/// The task exits when the bus is dropped. Returns the join handle so the
/// caller can await a flush on shutdown.
pub fn spawn_event_logger(bus: &EventBus, path: PathBuf) -> JoinHandle<Result<()>> {
    debug!(?path, "spawn_event_logger: called");
    let mut rx = bus.subscribe();

    tokio::spawn(async move {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err("Failed to create event log directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .wrap_err_with(|| format!("Failed to open event log at {}", path.display()))?;

        loop {
            match rx.recv().await {
                Ok(event) => {
                    write_line(&mut file, &event).await?;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event logger lagged, oldest events dropped");
                    let diag = Event::new("bus", EventKind::BusDropped { missed });
                    write_line(&mut file, &diag).await?;
                }
                Err(RecvError::Closed) => {
                    debug!("spawn_event_logger: bus closed, flushing");
                    file.flush().await.wrap_err("Failed to flush event log")?;
                    return Ok(());
                }
            }
        }
    })
}

async fn write_line(file: &mut tokio::fs::File, event: &Event) -> Result<()> {
    let mut line = serde_json::to_string(event).wrap_err("Failed to serialize event")?;
    line.push('\n');
    file.write_all(line.as_bytes()).await.wrap_err("Failed to write event log line")?;
    Ok(())
}

/// Read all events back from a JSONL log (inspection, tests)
pub async fn read_event_log(path: &std::path::Path) -> Result<Vec<Event>> {
    let body = tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("Failed to read event log at {}", path.display()))?;
    let mut events = Vec::new();
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        events.push(serde_json::from_str(line).wrap_err("Malformed event log line")?);
    }
    Ok(events)
}
