use std::env;
use std::time::Duration;

use anyhow::bail;
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;

use platelens_contracts::error::ScanError;
use platelens_contracts::request::AnalysisRequest;

pub const DEFAULT_ANALYSIS_URL: &str = "https://api.platelens.dev/v1/analyze";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one analysis call: the raw response text, or the single
/// collapsed failure kind.
pub type AnalysisOutcome = Result<String, ScanError>;

/// Seam to the generative-analysis service. Implementations issue exactly
/// one request per call, never retry, and resolve every failure into
/// `ScanError::ServiceFailure`.
pub trait AnalysisProvider {
    fn analyze(&self, request: &AnalysisRequest) -> AnalysisOutcome;
}

#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    endpoint: String,
    api_key: String,
    http: HttpClient,
}

impl HttpAnalysisClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            http: HttpClient::new(),
        }
    }

    /// Endpoint and credential from the environment. The credential must be
    /// resolved before the pipeline starts; there is no interactive path.
    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint = non_empty_env("PLATELENS_ANALYSIS_URL")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_ANALYSIS_URL.to_string());
        let Some(api_key) = non_empty_env("PLATELENS_API_KEY") else {
            bail!("PLATELENS_API_KEY not set");
        };
        Ok(Self::new(endpoint, api_key))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    text: String,
}

impl AnalysisProvider for HttpAnalysisClient {
    fn analyze(&self, request: &AnalysisRequest) -> AnalysisOutcome {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(request)
            .send()
            .map_err(|err| ScanError::ServiceFailure(format!("request failed: {err}")))?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(ScanError::ServiceFailure(format!(
                "service returned {code}: {}",
                truncate_text(&body, 512)
            )));
        }

        let payload: AnalysisResponse = response
            .json()
            .map_err(|err| ScanError::ServiceFailure(format!("unreadable response: {err}")))?;
        if payload.text.trim().is_empty() {
            return Err(ScanError::ServiceFailure(
                "response carried no text".to_string(),
            ));
        }
        Ok(payload.text)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}
