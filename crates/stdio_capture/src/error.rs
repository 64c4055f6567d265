use thiserror::Error;

/// Errors raised while building or configuring a capture system.
///
/// Text delivery itself reports plain [`std::io::Error`]s so destination
/// failures reach writers unchanged.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to parse capture config: {source}")]
    Config {
        #[source]
        source: toml::de::Error,
    },
    #[error("capture category `{category}` must not be blank")]
    InvalidCategory { category: String },
    #[error("max_line_bytes must be greater than zero")]
    InvalidLineLimit,
}
