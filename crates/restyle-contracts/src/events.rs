use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only writer for a session's `events.jsonl`.
///
/// Every line carries `type`, `session_id`, `ts` and `seq`; caller payload
/// is merged last and can override them. `seq` starts at 0 and is taken
/// under the file lock, so it matches line order across clones.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: Mutex::new(0),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Number of events written so far by this writer and its clones.
    pub fn emitted(&self) -> u64 {
        self.inner
            .next_seq
            .lock()
            .map(|seq| *seq)
            .unwrap_or_default()
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut next_seq = self
            .inner
            .next_seq
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.insert("seq".to_string(), Value::from(*next_seq));
        event.extend(payload);

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?
            .write_all(line.as_bytes())?;
        *next_seq += 1;

        Ok(Value::Object(event))
    }
}

/// Turns a `json!({...})` literal into an event payload.
pub fn payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let emitted = writer.emit("batch_started", payload(json!({"units": 3})))?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], json!("batch_started"));
        assert_eq!(parsed["session_id"], json!("session-123"));
        assert_eq!(parsed["units"], json!(3));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-123");

        let emitted = writer.emit(
            "unit_finished",
            payload(json!({"type": "override", "session_id": "other"})),
        )?;

        assert_eq!(emitted["type"], json!("override"));
        assert_eq!(emitted["session_id"], json!("other"));
        Ok(())
    }

    #[test]
    fn clones_append_to_the_same_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");
        let worker = writer.clone();

        let handle = std::thread::spawn(move || worker.emit("one", EventPayload::new()));
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker panicked"))??;
        writer.emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let types: Vec<String> = content
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(types, vec!["one".to_string(), "two".to_string()]);
        Ok(())
    }

    #[test]
    fn seq_follows_line_order_across_clones() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let worker = writer.clone();
                std::thread::spawn(move || -> anyhow::Result<()> {
                    for _ in 0..5 {
                        worker.emit("unit_finished", EventPayload::new())?;
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("worker panicked"))??;
        }

        let seqs: Vec<u64> = fs::read_to_string(&path)?
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("seq").and_then(Value::as_u64))
            .collect();
        assert_eq!(seqs, (0..20).collect::<Vec<u64>>());
        assert_eq!(writer.emitted(), 20);
        Ok(())
    }
}
