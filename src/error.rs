use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::fmt::Write;
use thiserror::Error;

/// Formats an error and its entire source chain with each error on a new line
///
/// This produces output like:
/// ```
/// Error message
///   Caused by: First cause
///   Caused by: Second cause
///   Caused by: Root cause
/// ```
pub fn format_error_chain(err: &dyn std::error::Error) -> String {
    let mut output = String::new();
    write!(&mut output, "{}", err).ok();

    let mut source = err.source();
    while let Some(err) = source {
        write!(&mut output, "\n  Caused by: {}", err).ok();
        source = err.source();
    }

    output
}

/// Formats an anyhow::Error with its full chain
pub fn format_anyhow_chain(err: &anyhow::Error) -> String {
    let mut output = String::new();

    let chain: Vec<_> = err.chain().collect();

    if let Some((first, rest)) = chain.split_first() {
        write!(&mut output, "{}", first).ok();
        for cause in rest {
            write!(&mut output, "\n  Caused by: {}", cause).ok();
        }
    }

    output
}

/// Central application error type.
///
/// Variants line up with the error taxonomy from the design doc: `Auth`-kind
/// failures are `GitAuth`/`WebhookSignature`, `Validation`-kind are
/// `Validation`/`InvalidInput`, `NotFound`-kind are `NotFound`/
/// `KubernetesNotFound`, `Deploy`-kind is `Helm`, and everything else
/// (`Internal`, `Config`, `Io`, ...) is treated as fatal-for-this-round but
/// retryable by the caller's `error_policy`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Kubernetes-related errors
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("Kubernetes config error: {0}")]
    KubernetesConfig(String),

    #[error("Kubernetes resource not found: {0}")]
    KubernetesNotFound(String),

    /// Git transport / authentication failures
    #[error("Git error: {0}")]
    Git(String),

    #[error("Git authentication failed: {0}")]
    GitAuth(String),

    /// Webhook-related errors
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Webhook signature verification failed")]
    WebhookSignature,

    /// HTTP client errors (Helm repo index, OCI registry, webhook HEAD shortcut)
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Bundle construction failures: malformed fleet.yaml, bad .fleetignore, etc.
    #[error("Bundle validation error: {0}")]
    Validation(String),

    /// Helm chart resolution/download/render/install failures
    #[error("Helm error: {0}")]
    Helm(String),

    /// Serialization/Deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// I/O errors (scratch filesystem, chart downloads, git clones)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors with context
    #[error("Internal error: {0}")]
    Internal(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        log::error!("HTTP error response: {}", self);

        let status_code = self.status_code();
        let error_message = self.to_string();

        let body = serde_json::json!({
            "error": error_message,
            "status": status_code.as_u16(),
        });

        HttpResponse::build(status_code)
            .content_type("application/json")
            .json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::WebhookSignature => StatusCode::UNAUTHORIZED,

            AppError::NotFound(_) | AppError::KubernetesNotFound(_) => StatusCode::NOT_FOUND,

            AppError::InvalidInput(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,

            AppError::Webhook(_) | AppError::Http(_) => StatusCode::BAD_GATEWAY,

            AppError::Kubernetes(_)
            | AppError::KubernetesConfig(_)
            | AppError::Git(_)
            | AppError::GitAuth(_)
            | AppError::Helm(_)
            | AppError::Json(_)
            | AppError::Yaml(_)
            | AppError::Config(_)
            | AppError::EnvVar(_)
            | AppError::Io(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Implement From for common error types that don't have automatic conversion
impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Internal(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Internal(s.to_string())
    }
}

impl From<globset::Error> for AppError {
    fn from(e: globset::Error) -> Self {
        AppError::Validation(format!(".fleetignore pattern error: {e}"))
    }
}
