//! Failure taxonomy for supervised asset loads.
//!
//! A deployment invalidates the previous build's hashed artifacts, so a
//! session started before the deploy can reference modules and manifests
//! that no longer exist on the server. The classifier separates those
//! stale-asset failures (recoverable by a forced refresh) from ordinary
//! transient and fatal errors.

use thiserror::Error;

/// Error kind attached to a generic "load failed" report.
///
/// Some hosts surface a stale dynamic load as a bare "load failed" with a
/// type-mismatch kind. Matching on the kind instead of the message keeps
/// ordinary network failures (whose messages also contain "failed") out of
/// the stale-asset bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailureKind {
    TypeMismatch,
    Aborted,
    Other,
}

#[derive(Error, Debug)]
pub enum AssetError {
    /// A dynamically loaded code module is gone from the server.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// A fetched resource did not parse as the expected structured format,
    /// typically an HTML error page served where a manifest was expected.
    #[error("invalid manifest: {0}")]
    InvalidManifest(#[from] serde_json::Error),

    /// Generic load failure with an error kind.
    #[error("load failed")]
    LoadFailed { kind: LoadFailureKind },

    #[error("unexpected status {status}")]
    Http { status: u16 },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Classification of a load failure, produced once and pattern-matched by
/// every downstream consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The deployed asset no longer exists; recoverable via retry then
    /// forced refresh.
    StaleAsset,
    /// Ordinary network/server trouble; retried on the next cycle.
    Transient,
    /// Everything else; surfaced to the caller's own error handling.
    Fatal,
}

/// Classify a load failure.
///
/// Conservative on purpose: a false negative leaves a stale session
/// lingering until the next poll, a false positive feeds a reload loop.
/// Only the low-ambiguity signatures count as stale.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    for cause in err.chain() {
        if let Some(asset) = cause.downcast_ref::<AssetError>() {
            return match asset {
                AssetError::ModuleNotFound(_) => ErrorClass::StaleAsset,
                AssetError::InvalidManifest(_) => ErrorClass::StaleAsset,
                AssetError::LoadFailed {
                    kind: LoadFailureKind::TypeMismatch,
                } => ErrorClass::StaleAsset,
                AssetError::LoadFailed { .. } => ErrorClass::Fatal,
                AssetError::Http { status } if *status == 429 || *status >= 500 => {
                    ErrorClass::Transient
                }
                AssetError::Http { .. } => ErrorClass::Fatal,
                AssetError::Network(_) => ErrorClass::Transient,
            };
        }
        if cause.downcast_ref::<reqwest::Error>().is_some() {
            return ErrorClass::Transient;
        }
    }
    ErrorClass::Fatal
}

/// True only when the error unambiguously indicates a deployed-asset
/// mismatch.
pub fn is_stale_asset_error(err: &anyhow::Error) -> bool {
    classify(err) == ErrorClass::StaleAsset
}
