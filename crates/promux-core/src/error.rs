use bytes::Bytes;
use serde_json::json;

/// What the router turns into an HTTP response.
#[derive(Debug)]
pub struct PipelineResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: PipelineBody,
}

#[derive(Debug)]
pub enum PipelineBody {
    Bytes(Bytes),
    Stream(tokio::sync::mpsc::Receiver<Bytes>),
}

pub fn error_body(message: &str, kind: Option<&str>) -> Bytes {
    let mut error = json!({"message": message});
    if let Some(kind) = kind {
        error["type"] = json!(kind);
    }
    Bytes::from(serde_json::to_vec(&json!({"error": error})).unwrap_or_default())
}

impl PipelineResponse {
    pub fn json(status: u16, body: Bytes) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: PipelineBody::Bytes(body),
        }
    }

    pub fn error(status: u16, message: &str, kind: Option<&str>) -> Self {
        Self::json(status, error_body(message, kind))
    }

    pub fn with_header(mut self, name: &str, value: String) -> Self {
        self.headers.push((name.to_string(), value));
        self
    }
}
