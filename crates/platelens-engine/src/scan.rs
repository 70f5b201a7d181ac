use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Local, Utc};
use serde_json::Value;

use platelens_contracts::capture::{CapturedImage, StorageEncoding};
use platelens_contracts::diagnostics::{DiagnosticPayload, DiagnosticsLog};
use platelens_contracts::error::ScanError;
use platelens_contracts::history::{HistoryLog, HistoryRecord, HistoryStore};
use platelens_contracts::request::AnalysisRequest;

use crate::client::{AnalysisOutcome, AnalysisProvider};
use crate::{encoder, prompt};

pub const INITIAL_RESULT_TEXT: &str = "Analysis results will appear here...";
pub const IN_PROGRESS_TEXT: &str = "Analyzing, please wait...";
pub const FAILURE_TEXT: &str = "Sorry, an error occurred during analysis.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Busy,
}

/// What became of a capture event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStart {
    /// The scan is underway; the request is ready for the provider.
    Pending(AnalysisRequest),
    /// A scan was already in flight; the event is inert.
    Dropped,
    /// The capture could not be encoded; no request was attempted.
    Failed,
}

/// Owns one user's scan pipeline: the Idle/Busy phase, the displayed result
/// text, and the single-writer history log. Capture events arriving while a
/// scan is in flight are dropped at the boundary; there is no queue and no
/// cancellation.
pub struct ScanSession<P> {
    phase: ScanPhase,
    display: String,
    log: HistoryLog,
    store: HistoryStore,
    provider: P,
    diagnostics: DiagnosticsLog,
    pending_image: Option<StorageEncoding>,
}

impl<P: AnalysisProvider> ScanSession<P> {
    /// Recovers the persisted history (never fails; corruption degrades to
    /// an empty log) and starts Idle.
    pub fn open(store: HistoryStore, provider: P, diagnostics: DiagnosticsLog) -> Self {
        let log = store.load();
        Self {
            phase: ScanPhase::Idle,
            display: INITIAL_RESULT_TEXT.to_string(),
            log,
            store,
            provider,
            diagnostics,
            pending_image: None,
        }
    }

    /// The capture event. Enters Busy, shows the in-progress placeholder
    /// before any slow work, and produces the analysis request. The storage
    /// encoding is held back for the history record.
    pub fn begin(&mut self, capture: &CapturedImage) -> CaptureStart {
        if self.phase == ScanPhase::Busy {
            self.diagnostics
                .record("scan_dropped_busy", DiagnosticPayload::new());
            return CaptureStart::Dropped;
        }
        self.phase = ScanPhase::Busy;
        self.display = IN_PROGRESS_TEXT.to_string();

        match encoder::encode(capture) {
            Ok((transport, storage)) => {
                let mut payload = DiagnosticPayload::new();
                payload.insert(
                    "mime_type".to_string(),
                    Value::String(capture.mime_type.clone()),
                );
                self.diagnostics.record("scan_started", payload);
                self.pending_image = Some(storage);
                CaptureStart::Pending(prompt::build_request(transport))
            }
            Err(err) => {
                self.settle_failure(&err);
                CaptureStart::Failed
            }
        }
    }

    /// The response event. Success appends a fresh record and replaces the
    /// held log; failure shows the fixed message and leaves history alone.
    /// Either way the session returns to Idle.
    pub fn complete(&mut self, outcome: AnalysisOutcome) {
        if self.phase == ScanPhase::Idle {
            return;
        }
        let image = self.pending_image.take();
        match outcome {
            Ok(text) => {
                let record = HistoryRecord::completed(
                    next_scan_id(),
                    image.map(StorageEncoding::into_string),
                    text.clone(),
                    capture_timestamp(),
                );
                self.log = self.store.append(record, &self.log);
                self.display = text;
                self.phase = ScanPhase::Idle;

                let mut payload = DiagnosticPayload::new();
                payload.insert(
                    "history_len".to_string(),
                    Value::Number(self.log.len().into()),
                );
                self.diagnostics.record("scan_completed", payload);
            }
            Err(err) => self.settle_failure(&err),
        }
    }

    /// The whole pipeline for one capture event: encode, request, analyze,
    /// settle.
    pub fn scan(&mut self, capture: &CapturedImage) {
        if let CaptureStart::Pending(request) = self.begin(capture) {
            let outcome = self.provider.analyze(&request);
            self.complete(outcome);
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn display_text(&self) -> &str {
        &self.display
    }

    pub fn history(&self) -> &HistoryLog {
        &self.log
    }

    fn settle_failure(&mut self, err: &ScanError) {
        let mut payload = DiagnosticPayload::new();
        payload.insert("reason".to_string(), Value::String(err.to_string()));
        self.diagnostics.record("scan_failed", payload);
        self.pending_image = None;
        self.display = FAILURE_TEXT.to_string();
        self.phase = ScanPhase::Idle;
    }
}

/// Time-derived but collision-free: the sequence component keeps ids unique
/// even for captures landing in the same millisecond.
fn next_scan_id() -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

fn capture_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::{HashSet, VecDeque};
    use std::fs;
    use std::path::Path;
    use std::rc::Rc;

    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};
    use serde_json::{json, Value};

    use super::{
        next_scan_id, CaptureStart, ScanPhase, ScanSession, FAILURE_TEXT, INITIAL_RESULT_TEXT,
        IN_PROGRESS_TEXT,
    };
    use crate::client::{AnalysisOutcome, AnalysisProvider};
    use platelens_contracts::capture::CapturedImage;
    use platelens_contracts::diagnostics::DiagnosticsLog;
    use platelens_contracts::error::ScanError;
    use platelens_contracts::history::HistoryStore;
    use platelens_contracts::request::AnalysisRequest;

    const TOMATO_TEXT: &str =
        "**Analysis:** It is a tomato. <span class=\"health-score\">Health Score: 8/10</span>";

    struct ScriptedProvider {
        responses: RefCell<VecDeque<String>>,
        calls: Rc<Cell<usize>>,
    }

    impl ScriptedProvider {
        fn succeeding(texts: &[&str]) -> Self {
            Self {
                responses: RefCell::new(texts.iter().map(|text| text.to_string()).collect()),
                calls: Rc::new(Cell::new(0)),
            }
        }

        fn failing() -> Self {
            Self::succeeding(&[])
        }

        fn call_count(&self) -> Rc<Cell<usize>> {
            Rc::clone(&self.calls)
        }
    }

    impl AnalysisProvider for ScriptedProvider {
        fn analyze(&self, _request: &AnalysisRequest) -> AnalysisOutcome {
            self.calls.set(self.calls.get() + 1);
            let next = self.responses.borrow_mut().pop_front();
            match next {
                Some(text) => Ok(text),
                None => Err(ScanError::ServiceFailure("scripted failure".to_string())),
            }
        }
    }

    fn red_jpeg_capture() -> CapturedImage {
        let mut canvas = RgbImage::new(10, 10);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([255, 0, 0]);
        }
        let mut bytes = Vec::new();
        canvas
            .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, 90))
            .expect("jpeg encode");
        CapturedImage::new(bytes, "image/jpeg")
    }

    fn session_in(dir: &Path, provider: ScriptedProvider) -> ScanSession<ScriptedProvider> {
        let diagnostics = DiagnosticsLog::new(dir.join("diagnostics.jsonl"));
        let store = HistoryStore::new(dir.join("history.json"), diagnostics.clone());
        ScanSession::open(store, provider, diagnostics)
    }

    #[test]
    fn successful_scan_updates_display_and_appends_history() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = session_in(temp.path(), ScriptedProvider::succeeding(&[TOMATO_TEXT]));
        assert_eq!(session.display_text(), INITIAL_RESULT_TEXT);

        session.scan(&red_jpeg_capture());

        assert_eq!(session.phase(), ScanPhase::Idle);
        assert_eq!(session.display_text(), TOMATO_TEXT);
        assert_eq!(session.history().len(), 1);

        let record = &session.history().records()[0];
        assert_eq!(record.analysis_result.as_deref(), Some(TOMATO_TEXT));
        assert!(record
            .image_data
            .as_deref()
            .is_some_and(|data| data.starts_with("data:image/jpeg;base64,")));
        assert!(record.is_displayable());

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(
            temp.path().join("history.json"),
        )?)?;
        assert_eq!(on_disk.as_array().map(Vec::len), Some(1));
        Ok(())
    }

    #[test]
    fn failed_scan_shows_fixed_message_and_leaves_history() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = session_in(temp.path(), ScriptedProvider::failing());

        session.scan(&red_jpeg_capture());

        assert_eq!(session.phase(), ScanPhase::Idle);
        assert_eq!(session.display_text(), FAILURE_TEXT);
        assert!(session.history().is_empty());
        assert!(!temp.path().join("history.json").exists());
        Ok(())
    }

    #[test]
    fn unreadable_capture_never_reaches_the_provider() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let provider = ScriptedProvider::succeeding(&[TOMATO_TEXT]);
        let calls = provider.call_count();
        let mut session = session_in(temp.path(), provider);

        session.scan(&CapturedImage::new(b"not an image".to_vec(), "image/jpeg"));

        assert_eq!(calls.get(), 0);
        assert_eq!(session.display_text(), FAILURE_TEXT);
        assert!(session.history().is_empty());
        assert_eq!(session.phase(), ScanPhase::Idle);
        Ok(())
    }

    #[test]
    fn second_capture_while_busy_is_dropped() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = session_in(temp.path(), ScriptedProvider::succeeding(&[TOMATO_TEXT]));

        let first = session.begin(&red_jpeg_capture());
        assert!(matches!(first, CaptureStart::Pending(_)));
        assert_eq!(session.phase(), ScanPhase::Busy);
        assert_eq!(session.display_text(), IN_PROGRESS_TEXT);

        let second = session.begin(&red_jpeg_capture());
        assert_eq!(second, CaptureStart::Dropped);
        assert_eq!(session.display_text(), IN_PROGRESS_TEXT);

        session.complete(Ok(TOMATO_TEXT.to_string()));
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.display_text(), TOMATO_TEXT);
        assert_eq!(session.phase(), ScanPhase::Idle);
        Ok(())
    }

    #[test]
    fn consecutive_scans_accumulate_newest_first() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let provider = ScriptedProvider::succeeding(&["one", "two", "three"]);
        let calls = provider.call_count();
        let mut session = session_in(temp.path(), provider);

        for _ in 0..3 {
            session.scan(&red_jpeg_capture());
        }

        assert_eq!(calls.get(), 3);
        assert_eq!(session.history().len(), 3);
        let texts: Vec<_> = session
            .history()
            .records()
            .iter()
            .map(|record| record.analysis_result.as_deref().unwrap_or(""))
            .collect();
        assert_eq!(texts, vec!["three", "two", "one"]);

        let ids: HashSet<_> = session
            .history()
            .records()
            .iter()
            .map(|record| record.id.clone())
            .collect();
        assert_eq!(ids.len(), 3);

        // A fresh session over the same store sees the persisted log.
        let reopened = session_in(temp.path(), ScriptedProvider::failing());
        assert_eq!(reopened.history().len(), 3);
        assert_eq!(reopened.display_text(), INITIAL_RESULT_TEXT);
        Ok(())
    }

    #[test]
    fn open_recovers_from_a_corrupt_store() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("history.json"), "[not json")?;

        let session = session_in(temp.path(), ScriptedProvider::failing());
        assert!(session.history().is_empty());
        assert_eq!(
            fs::read_to_string(temp.path().join("history.json"))?,
            "[]"
        );
        Ok(())
    }

    #[test]
    fn display_filter_hides_partial_records() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(
            temp.path().join("history.json"),
            serde_json::to_string(&json!([
                {"id": "2-0", "imageData": "data:image/png;base64,AA", "analysisResult": "ok", "timestamp": "t"},
                {"id": "1-0", "imageData": "data:image/png;base64,AA", "timestamp": "t"},
            ]))?,
        )?;

        let session = session_in(temp.path(), ScriptedProvider::failing());
        assert_eq!(session.history().len(), 2);
        let displayable: Vec<_> = session.history().displayable().collect();
        assert_eq!(displayable.len(), 1);
        assert_eq!(displayable[0].id.as_deref(), Some("2-0"));
        Ok(())
    }

    #[test]
    fn scan_ids_stay_unique_within_one_millisecond() {
        let ids: HashSet<_> = (0..1000).map(|_| next_scan_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
