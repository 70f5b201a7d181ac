use serde::Serialize;

use crate::capture::TransportEncoding;

/// Wire payload for the generative-analysis service: one instruction, one
/// inline image. Built once per scan and consumed by a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRequest {
    pub instruction: String,
    pub image: ImagePayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImagePayload {
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl AnalysisRequest {
    pub fn new(instruction: impl Into<String>, transport: TransportEncoding) -> Self {
        Self {
            instruction: instruction.into(),
            image: ImagePayload {
                data: transport.data,
                mime_type: transport.mime_type,
            },
        }
    }
}
