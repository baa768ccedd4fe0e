use thiserror::Error;

/// Rejections of malformed feed or asset input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("malformed photo path `{path}`")]
    MalformedPhotoPath { path: String },
    #[error("unsupported photo size `{token}`")]
    UnsupportedPhotoSize { token: String },
    #[error("timestamp {millis}ms is outside the supported range")]
    TimestampOutOfRange { millis: i64 },
}
