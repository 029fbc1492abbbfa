//! Error types and handling for multi-tenant OIDC authentication

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

/// Result type alias for authentication operations
pub type Result<T> = std::result::Result<T, OidcError>;

/// Main error type for tenant resolution and authentication
#[derive(Error, Debug)]
pub enum OidcError {
    /// No tenant could be resolved for the request (issuer based mode only)
    #[error("Tenant resolution failed: {message}")]
    ResolutionFailure { message: String },

    /// Credential absent, malformed or rejected by the identity provider
    #[error("Credential failure: {message}")]
    CredentialFailure { message: String },

    /// Presented credentials were invalid or rejected
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// A custom identity veto explicitly aborted authentication
    #[error("Authentication aborted: {message}")]
    CompletionAbort { message: String },

    /// Token state did not match the active token state manager's format
    #[error("Invalid token state: {message}")]
    StateDecodeFailure { message: String },

    /// Invalid configuration detected at startup
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Non-success status returned by the identity provider, passed through verbatim
    #[error("Identity provider returned status {status}: {body}")]
    IdentityProviderStatus { status: u16, body: String },

    /// Connection errors while talking to the identity provider
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OidcError {
    /// Create a tenant resolution error
    pub fn resolution<S: Into<String>>(message: S) -> Self {
        Self::ResolutionFailure {
            message: message.into(),
        }
    }

    /// Create a credential error
    pub fn credential<S: Into<String>>(message: S) -> Self {
        Self::CredentialFailure {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Create a terminal completion abort
    pub fn abort<S: Into<String>>(message: S) -> Self {
        Self::CompletionAbort {
            message: message.into(),
        }
    }

    /// Create a token state decoding error
    pub fn state_decode<S: Into<String>>(message: S) -> Self {
        Self::StateDecodeFailure {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Whether the error ends authentication for the request without trying
    /// another mechanism
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OidcError::CompletionAbort { .. } | OidcError::AuthenticationFailed { .. }
        )
    }

    /// HTTP status the error resolves to at request time
    pub fn status_code(&self) -> StatusCode {
        match self {
            OidcError::ResolutionFailure { .. }
            | OidcError::CredentialFailure { .. }
            | OidcError::AuthenticationFailed { .. }
            | OidcError::CompletionAbort { .. }
            | OidcError::StateDecodeFailure { .. } => StatusCode::UNAUTHORIZED,
            OidcError::IdentityProviderStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            OidcError::Connection { .. } | OidcError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            OidcError::ResolutionFailure { .. } => "resolution",
            OidcError::CredentialFailure { .. } => "credential",
            OidcError::AuthenticationFailed { .. } => "authentication",
            OidcError::CompletionAbort { .. } => "completion_abort",
            OidcError::StateDecodeFailure { .. } => "state_decode",
            OidcError::Config { .. } => "config",
            OidcError::IdentityProviderStatus { .. } => "identity_provider",
            OidcError::Connection { .. } => "connection",
            OidcError::Io(_) => "io",
            OidcError::Serde(_) => "serialization",
            OidcError::Yaml(_) => "yaml",
            OidcError::Http(_) => "http",
            OidcError::Internal(_) => "internal",
        }
    }
}

impl ResponseError for OidcError {
    fn status_code(&self) -> StatusCode {
        OidcError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            // Identity provider errors reach the client unchanged
            OidcError::IdentityProviderStatus { body, .. } => {
                HttpResponse::build(OidcError::status_code(self)).body(body.clone())
            }
            _ => HttpResponse::build(OidcError::status_code(self))
                .content_type("application/json")
                .json(serde_json::json!({
                    "error": self.category(),
                    "message": self.to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_time_failures_map_to_unauthorized() {
        for error in [
            OidcError::resolution("no issuer match"),
            OidcError::credential("stale secret"),
            OidcError::auth("bad token"),
            OidcError::abort("denylisted"),
            OidcError::state_decode("missing marker"),
        ] {
            assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED, "{}", error);
        }
    }

    #[test]
    fn identity_provider_status_is_passed_through() {
        let error = OidcError::IdentityProviderStatus {
            status: 400,
            body: "Client not found".to_string(),
        };
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.category(), "identity_provider");
    }

    #[test]
    fn config_errors_are_internal_at_request_time() {
        let error = OidcError::config("broken");
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.is_terminal());
        assert!(OidcError::abort("veto").is_terminal());
    }
}
