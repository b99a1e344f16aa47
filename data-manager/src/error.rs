//! Errors surfaced at the pipeline boundary

use thiserror::Error;

use trading_common::error::{ConfigurationError, ErrorCategory, ErrorClassification};

use crate::archive::ArchiveError;
use crate::checkpoint::RecoveryError;
use crate::fetcher::FetchError;
use crate::provider::ProviderError;
use crate::storage::StoreError;
use crate::stream::StreamError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Failed to write report {path}: {source}")]
    Report {
        path: String,
        #[source]
        source: csv::Error,
    },
}

impl ErrorClassification for PipelineError {
    fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Configuration(_) => ErrorCategory::Configuration,
            PipelineError::Provider(e) => e.category(),
            PipelineError::Store(e) => e.category(),
            PipelineError::Archive(e) => e.category(),
            PipelineError::Recovery(e) => e.category(),
            PipelineError::Stream(e) => e.category(),
            PipelineError::Report { .. } => ErrorCategory::Transient,
        }
    }
}

impl From<FetchError<PipelineError>> for PipelineError {
    fn from(err: FetchError<PipelineError>) -> Self {
        match err {
            FetchError::Provider(e) => PipelineError::Provider(e),
            FetchError::Sink(e) => e,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
