//! Error classification for investigation failures.
//!
//! Every failure that crosses a decision-tree boundary is either:
//! - **Infrastructure**: an external platform call failed. The whole
//!   investigation is retried by the runner with bounded attempts.
//! - **Finding**: the investigation reached an inconclusive state from valid
//!   data. It is written to the notes and escalated, never retried.
//!
//! The kind is attached where the failure is first observed. Errors that were
//! never classified are treated as Infrastructure so that they are retried
//! rather than swallowed.

use std::fmt;

use thiserror::Error;

/// Classification attached to a failure at its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient platform failure; retry the investigation.
    Infrastructure,
    /// Invalid or inconclusive data; report and escalate.
    Finding,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Finding => write!(f, "finding"),
        }
    }
}

/// A failure wrapped with its classification and a human-readable context.
#[derive(Debug, Error)]
#[error("{context}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    context: String,
    #[source]
    source: anyhow::Error,
}

impl ClassifiedError {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

/// Wrap `err` as an Infrastructure failure.
pub fn as_infrastructure(err: impl Into<anyhow::Error>, context: impl Into<String>) -> anyhow::Error {
    classify_as(err.into(), ErrorKind::Infrastructure, context.into())
}

/// Wrap `err` as a Finding.
pub fn as_finding(err: impl Into<anyhow::Error>, context: impl Into<String>) -> anyhow::Error {
    classify_as(err.into(), ErrorKind::Finding, context.into())
}

fn classify_as(err: anyhow::Error, kind: ErrorKind, context: String) -> anyhow::Error {
    // The first classification wins; later wrappers only add context.
    if classified_kind(&err).is_some() {
        return err.context(context);
    }
    ClassifiedError {
        kind,
        context,
        source: err,
    }
    .into()
}

/// Kind attached at the origin of `err`, if any.
pub fn classified_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ClassifiedError>())
        .last()
        .map(ClassifiedError::kind)
}

/// Effective kind of `err`. Unclassified errors count as Infrastructure.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    classified_kind(err).unwrap_or(ErrorKind::Infrastructure)
}

pub fn is_infrastructure(err: &anyhow::Error) -> bool {
    classify(err) == ErrorKind::Infrastructure
}

pub fn is_finding(err: &anyhow::Error) -> bool {
    classify(err) == ErrorKind::Finding
}

/// Classify a `Result` at the call site, in the manner of `anyhow::Context`.
pub trait Classify<T> {
    fn infrastructure(self, context: impl Into<String>) -> anyhow::Result<T>;
    fn finding(self, context: impl Into<String>) -> anyhow::Result<T>;
}

impl<T, E> Classify<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn infrastructure(self, context: impl Into<String>) -> anyhow::Result<T> {
        self.map_err(|e| as_infrastructure(e, context))
    }

    fn finding(self, context: impl Into<String>) -> anyhow::Result<T> {
        self.map_err(|e| as_finding(e, context))
    }
}
