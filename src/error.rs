//! Error types for the gateway.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// Bad request shape. Fatal, no side effects, never billed.
    #[error("Invalid request: {message}")]
    Validation { message: String },

    /// Requested model is not in the catalog.
    #[error("Unknown model: {model}")]
    UnknownModel { model: String },

    /// Model exists but its provider has no credential configured.
    #[error("Model unavailable: {message}")]
    Unavailable { message: String },

    /// Caller's prepaid balance cannot cover the request.
    #[error("Insufficient credits: {message}")]
    InsufficientCredits { message: String },

    /// Network or provider-side failure at or after the dispatch boundary.
    #[error("Upstream error: {message}")]
    Upstream { status: Option<u16>, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn unknown_model(model: impl Into<String>) -> Self {
        Self::UnknownModel {
            model: model.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable {
            message: msg.into(),
        }
    }

    pub fn insufficient_credits(msg: impl Into<String>) -> Self {
        Self::InsufficientCredits {
            message: msg.into(),
        }
    }

    pub fn upstream(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// HTTP status for the caller-facing error surface.
    ///
    /// Provider statuses >= 400 are passed through; an unreachable provider
    /// maps to 503 since the caller can retry once it is back up.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::UnknownModel { .. } => 400,
            Self::InsufficientCredits { .. } => 402,
            Self::Unavailable { .. } => 503,
            Self::Upstream { status, .. } => match status {
                Some(s) if *s >= 400 => *s,
                _ => 503,
            },
            Self::Http(_) => 503,
            _ => 500,
        }
    }

    /// Stable machine-readable slug for error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "invalid_request_error",
            Self::UnknownModel { .. } => "model_not_found",
            Self::Unavailable { .. } => "model_unavailable",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::Upstream { .. } | Self::Http(_) => "upstream_error",
            Self::Config { .. } => "config_error",
            _ => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::validation("x").status_code(), 400);
        assert_eq!(GatewayError::unknown_model("m").status_code(), 400);
        assert_eq!(GatewayError::insufficient_credits("x").status_code(), 402);
        assert_eq!(GatewayError::unavailable("x").status_code(), 503);
        assert_eq!(GatewayError::upstream(None, "down").status_code(), 503);
        assert_eq!(GatewayError::upstream(Some(500), "boom").status_code(), 500);
        assert_eq!(GatewayError::upstream(Some(429), "slow").status_code(), 429);
    }
}
