use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type DiagnosticPayload = Map<String, Value>;

/// Append-only writer for `diagnostics.jsonl`.
///
/// Default fields are `event`, `session_id`, `ts`; the caller payload is
/// merged last and can override them. One compact JSON object per line.
/// Cloning shares the underlying file and session id.
#[derive(Debug, Clone)]
pub struct DiagnosticsLog {
    inner: Arc<DiagnosticsLogInner>,
}

#[derive(Debug)]
struct DiagnosticsLogInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl DiagnosticsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DiagnosticsLogInner {
                path: path.into(),
                session_id: Uuid::new_v4().to_string(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event: &str, payload: DiagnosticPayload) -> anyhow::Result<Value> {
        let mut entry = Map::new();
        entry.insert("event".to_string(), Value::String(event.to_string()));
        entry.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        entry.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            entry.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&entry)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("diagnostics lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(entry))
    }

    /// Best-effort emit for paths that must never fail, like store recovery
    /// at startup. A diagnostics write error is dropped on the floor.
    pub fn record(&self, event: &str, payload: DiagnosticPayload) {
        let _ = self.emit(event, payload);
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
