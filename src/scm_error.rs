use reqwest::{header::HeaderMap, StatusCode};

/// Coarse classification of a failed SCM API call. Collectors branch on this,
/// never on provider-specific error payloads.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ScmErrorKind {
    /// Network failure, rate limiting or a 5xx answer. Worth retrying.
    Transient,
    /// The credential is not allowed to see the resource.
    PermissionDenied,
    /// The resource does not exist, or is hidden from the credential.
    NotFound,
    /// The plan/tier of the owner never exposes this feature.
    FeatureUnsupported,
    /// GitHub's "Branch not protected" answer to a protection lookup.
    BranchNotProtected,
    /// Anything else (malformed payloads, unexpected statuses).
    Other,
}

impl ScmErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(self, ScmErrorKind::Transient)
    }

    /// Failures that indicate the credential lacks access rather than an
    /// operational problem.
    pub fn is_authorization(self) -> bool {
        matches!(self, ScmErrorKind::PermissionDenied | ScmErrorKind::NotFound)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error{status}: {message}", status = format_status(.status))]
pub struct ScmError {
    pub kind: ScmErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

fn format_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl ScmError {
    pub fn new(kind: ScmErrorKind, message: impl Into<String>) -> Self {
        Self { kind, status: None, message: message.into() }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ScmErrorKind::Transient, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ScmErrorKind::NotFound, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ScmErrorKind::Other, message)
    }

    /// Classify a non-success HTTP answer. `message` is the `message` field of
    /// the error body when the provider sent one.
    pub fn from_response(status: StatusCode, headers: &HeaderMap, message: &str) -> Self {
        let kind = classify(status, headers, message);
        let message = if message.is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            message.to_string()
        };
        Self::new(kind, message).with_status(status.as_u16())
    }
}

impl From<reqwest::Error> for ScmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ScmError::other(format!("failed to decode response: {err}"));
        }
        match err.status() {
            Some(status) => ScmError::from_response(status, &HeaderMap::new(), &err.to_string()),
            None => ScmError::transient(err.to_string()),
        }
    }
}

const UPGRADE_MARKERS: [&str; 3] =
    ["Upgrade to GitHub Pro", "make this repository public", "not available for this plan"];

fn classify(status: StatusCode, headers: &HeaderMap, message: &str) -> ScmErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ScmErrorKind::Transient,
        StatusCode::FORBIDDEN if rate_limited(headers) => ScmErrorKind::Transient,
        StatusCode::FORBIDDEN if UPGRADE_MARKERS.iter().any(|m| message.contains(m)) => {
            ScmErrorKind::FeatureUnsupported
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ScmErrorKind::PermissionDenied,
        StatusCode::NOT_FOUND if message == "Branch not protected" => {
            ScmErrorKind::BranchNotProtected
        }
        StatusCode::NOT_FOUND => ScmErrorKind::NotFound,
        s if s.is_server_error() => ScmErrorKind::Transient,
        _ => ScmErrorKind::Other,
    }
}

fn rate_limited(headers: &HeaderMap) -> bool {
    headers.contains_key("retry-after")
        || headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0")
}
