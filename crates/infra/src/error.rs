//! Service error taxonomy.
//!
//! | Variant | Meaning | Side effects before it is returned |
//! |---------|---------|------------------------------------|
//! | `Validation` | bad or missing input | none |
//! | `Authorization` | resource exists but belongs to someone else | none |
//! | `NotFound` | resource absent | none |
//! | `Upstream` | store or processor call failed | possibly a compensated write |
//! | `Inconsistency` | an external change happened, its local record did not | the external change |
//!
//! `Inconsistency` is the severe class: it is always logged at `error` with
//! `inconsistency = true` so it can be picked out for manual reconciliation.

use thiserror::Error;

use tally_core::{DocumentId, DomainError};

use crate::processor::ProcessorError;
use crate::store::StoreError;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// The processor accepted the session but returned no URL to send the payer to.
    #[error("checkout session {session_id} has no checkout url")]
    MissingCheckoutUrl { session_id: String },

    #[error("no free document number after {attempts} attempts")]
    NumberSpaceExhausted { attempts: u32 },
}

/// External and local state disagree and nobody will fix it automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inconsistency {
    pub operation: &'static str,
    pub document_id: Option<DocumentId>,
    pub detail: String,
    /// What an operator has to do about it.
    pub action_required: &'static str,
}

impl std::fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} left inconsistent state", self.operation)?;
        if let Some(id) = self.document_id {
            write!(f, " on document {id}")?;
        }
        write!(f, ": {} ({})", self.detail, self.action_required)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{operation} failed upstream: {source}")]
    Upstream {
        operation: &'static str,
        #[source]
        source: UpstreamError,
    },

    #[error("{0}")]
    Inconsistency(Inconsistency),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Wrap an upstream failure and log it with its operation.
    pub fn upstream(operation: &'static str, source: impl Into<UpstreamError>) -> Self {
        let source = source.into();
        tracing::warn!(operation, error = %source, "upstream call failed");
        Self::Upstream { operation, source }
    }

    /// Build and loudly log an inconsistency.
    pub fn inconsistency(
        operation: &'static str,
        document_id: Option<DocumentId>,
        detail: impl Into<String>,
        action_required: &'static str,
    ) -> Self {
        let inconsistency = Inconsistency {
            operation,
            document_id,
            detail: detail.into(),
            action_required,
        };
        tracing::error!(
            inconsistency = true,
            operation,
            document_id = ?document_id.map(|id| id.to_string()),
            detail = %inconsistency.detail,
            action_required,
            "local state diverged from external state"
        );
        Self::Inconsistency(inconsistency)
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::Authorization(_) => "authorization_error",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Upstream { source, .. } => match source {
                UpstreamError::Store(_) => "store_error",
                UpstreamError::Processor(_) => "processor_error",
                UpstreamError::MissingCheckoutUrl { .. } => "missing_checkout_url",
                UpstreamError::NumberSpaceExhausted { .. } => "number_allocation_failed",
            },
            ServiceError::Inconsistency(_) => "inconsistency",
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::InvariantViolation(msg) => Self::Validation(msg),
            other @ DomainError::IllegalTransition { .. } => Self::Validation(other.to_string()),
        }
    }
}
