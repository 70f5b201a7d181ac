use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diagnostics::{DiagnosticPayload, DiagnosticsLog};

pub const EMPTY_LOG_JSON: &str = "[]";

/// Legacy value some embedding shells persist when the store key was never
/// written; treated as missing rather than corrupt.
const MISSING_SENTINEL: &str = "undefined";

/// One past analysis. Immutable once appended. Fields are optional at the
/// serde layer so partial legacy entries still load; such records are kept
/// in the log and filtered out at display time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl HistoryRecord {
    pub fn completed(
        id: impl Into<String>,
        image_data: Option<String>,
        analysis_result: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            image_data,
            analysis_result: Some(analysis_result.into()),
            timestamp: Some(timestamp.into()),
        }
    }

    pub fn is_displayable(&self) -> bool {
        present(&self.id)
            && present(&self.image_data)
            && present(&self.analysis_result)
            && present(&self.timestamp)
    }
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|value| !value.trim().is_empty())
}

/// Newest-first sequence of past analyses. Replaced wholesale on append,
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog {
    records: Vec<HistoryRecord>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    /// Records complete enough to render; partial legacy entries are
    /// skipped here instead of failing the whole render.
    pub fn displayable(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.iter().filter(|record| record.is_displayable())
    }

    fn prepended(&self, record: HistoryRecord) -> Self {
        let mut records = Vec::with_capacity(self.records.len() + 1);
        records.push(record);
        records.extend(self.records.iter().cloned());
        Self { records }
    }
}

/// Durable store for the history log: one JSON file holding the serialized
/// newest-first array. `load` never fails; unreadable state degrades to an
/// empty log and corruption resets the file.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    diagnostics: DiagnosticsLog,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, diagnostics: DiagnosticsLog) -> Self {
        Self {
            path: path.into(),
            diagnostics,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> HistoryLog {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return HistoryLog::new(),
            Err(err) => {
                self.diagnostics
                    .record("history_read_failed", reason_payload(&err.to_string()));
                return HistoryLog::new();
            }
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == MISSING_SENTINEL {
            return HistoryLog::new();
        }

        let parsed: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(err) => return self.recover_corrupt(&format!("not valid JSON: {err}")),
        };
        let Some(entries) = parsed.as_array() else {
            return self.recover_corrupt("expected a JSON array");
        };

        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            match serde_json::from_value::<HistoryRecord>(entry.clone()) {
                Ok(record) => records.push(record),
                Err(err) => {
                    let mut payload = reason_payload(&err.to_string());
                    payload.insert("index".to_string(), Value::Number(index.into()));
                    self.diagnostics.record("history_entry_skipped", payload);
                }
            }
        }
        HistoryLog { records }
    }

    /// Prepends `record` and persists the entire updated serialization. A
    /// persist failure is downgraded to a diagnostics warning: the updated
    /// in-memory log is still returned, and the next append rewrites the
    /// whole file again.
    pub fn append(&self, record: HistoryRecord, log: &HistoryLog) -> HistoryLog {
        let updated = log.prepended(record);
        if let Err(err) = self.persist(&updated) {
            self.diagnostics
                .record("history_persist_failed", reason_payload(&format!("{err:#}")));
        }
        updated
    }

    fn persist(&self, log: &HistoryLog) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string(log)?;
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, serialized)
            .with_context(|| format!("failed writing {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("failed replacing {}", self.path.display()))?;
        Ok(())
    }

    fn recover_corrupt(&self, reason: &str) -> HistoryLog {
        self.diagnostics
            .record("history_corrupt_reset", reason_payload(reason));
        if let Err(err) = self.persist(&HistoryLog::new()) {
            self.diagnostics
                .record("history_reset_failed", reason_payload(&format!("{err:#}")));
        }
        HistoryLog::new()
    }
}

fn reason_payload(reason: &str) -> DiagnosticPayload {
    let mut payload = DiagnosticPayload::new();
    payload.insert("reason".to_string(), Value::String(reason.to_string()));
    payload
}
