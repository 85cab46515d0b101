use promux_protocol::WireFormat;

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("invalid {format} request body: {message}")]
    InvalidRequest {
        format: WireFormat,
        message: String,
    },
    #[error("no translator registered for {src} -> {dst}")]
    UnsupportedPair { src: WireFormat, dst: WireFormat },
}

impl TranslateError {
    pub fn invalid(format: WireFormat, err: impl std::fmt::Display) -> Self {
        TranslateError::InvalidRequest {
            format,
            message: err.to_string(),
        }
    }
}
