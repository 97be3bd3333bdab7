//! Error types for the chat core.

use std::time::Duration;

use thiserror::Error;

use crate::core::ids::{ProjectId, ProviderId, SessionId};

/// Chat core error type.
///
/// One enum covers every layer so callers can match exhaustively on both
/// arms of every operation. Upstream-family differences never leak out of
/// the adapter boundary: whatever the wire looked like, it arrives here as
/// one of these kinds.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A project id was required but not supplied.
    #[error("project id is required")]
    MissingProjectId,
    /// The referenced project does not exist.
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),
    /// The referenced session does not exist (under the given project).
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    /// A message role outside {user, assistant, system}.
    #[error("invalid role: {0}")]
    InvalidRole(String),
    /// A request parameter outside its documented range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The referenced provider does not exist or is inactive.
    #[error("provider not found or inactive: {0}")]
    ProviderNotFound(ProviderId),
    /// The provider exists but has no API key in the credential store.
    #[error("provider has no API key configured: {0}")]
    ProviderUnconfigured(ProviderId),
    /// The provider family has no adapter.
    #[error("unsupported provider family: {0}")]
    UnsupportedProvider(String),
    /// Admission denied locally, or the upstream rate limit was exhausted.
    #[error("rate limit exceeded, retry after {}s", .retry_after.as_secs())]
    RateLimitExceeded {
        /// How long to wait before the request could be admitted.
        retry_after: Duration,
    },
    /// Non-retryable upstream rejection; carries the provider's message.
    #[error("upstream rejected the request ({status}): {detail}")]
    Upstream4xx {
        /// HTTP status code returned by the upstream.
        status: u16,
        /// Upstream error message, preserved verbatim.
        detail: String,
    },
    /// Retryable upstream server error, surfaced after the retry budget.
    #[error("upstream server error ({status})")]
    Upstream5xx {
        /// HTTP status code returned by the upstream.
        status: u16,
    },
    /// Connection-level failure talking to the upstream.
    #[error("transport error: {0}")]
    Transport(String),
    /// The per-attempt deadline elapsed before the upstream answered.
    #[error("request timed out")]
    Timeout,
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// I/O error from one of the file-backed stores.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Otherwise-unclassified bug; always loggable.
    #[error("internal error: {0}")]
    Internal(String),
    /// A dispatch failure with the session and provider it happened under.
    ///
    /// The orchestrator wraps engine errors in this variant; the inner kind
    /// is preserved and reachable via [`ChatError::kind`].
    #[error("dispatch failed for session {session_id} via provider {provider_id}: {source}")]
    Dispatch {
        /// Session the send was issued against.
        session_id: SessionId,
        /// Provider the dispatch targeted.
        provider_id: ProviderId,
        /// The underlying dispatch error, unchanged.
        #[source]
        source: Box<ChatError>,
    },
}

/// Stable classification of a [`ChatError`], independent of its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`ChatError::MissingProjectId`].
    MissingProjectId,
    /// See [`ChatError::ProjectNotFound`].
    ProjectNotFound,
    /// See [`ChatError::SessionNotFound`].
    SessionNotFound,
    /// See [`ChatError::InvalidRole`].
    InvalidRole,
    /// See [`ChatError::InvalidArgument`].
    InvalidArgument,
    /// See [`ChatError::ProviderNotFound`].
    ProviderNotFound,
    /// See [`ChatError::ProviderUnconfigured`].
    ProviderUnconfigured,
    /// See [`ChatError::UnsupportedProvider`].
    UnsupportedProvider,
    /// See [`ChatError::RateLimitExceeded`].
    RateLimitExceeded,
    /// See [`ChatError::Upstream4xx`].
    Upstream4xx,
    /// See [`ChatError::Upstream5xx`].
    Upstream5xx,
    /// See [`ChatError::Transport`].
    TransportError,
    /// See [`ChatError::Timeout`].
    Timeout,
    /// Everything else, including serialization and I/O failures.
    Internal,
}

impl ChatError {
    /// Classify this error. The dispatch wrapper reports its inner kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingProjectId => ErrorKind::MissingProjectId,
            Self::ProjectNotFound(_) => ErrorKind::ProjectNotFound,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::InvalidRole(_) => ErrorKind::InvalidRole,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::ProviderNotFound(_) => ErrorKind::ProviderNotFound,
            Self::ProviderUnconfigured(_) => ErrorKind::ProviderUnconfigured,
            Self::UnsupportedProvider(_) => ErrorKind::UnsupportedProvider,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::Upstream4xx { .. } => ErrorKind::Upstream4xx,
            Self::Upstream5xx { .. } => ErrorKind::Upstream5xx,
            Self::Transport(_) => ErrorKind::TransportError,
            Self::Timeout => ErrorKind::Timeout,
            Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
            Self::Dispatch { source, .. } => source.kind(),
        }
    }

    /// Whether the dispatch engine may retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Upstream5xx
                | ErrorKind::TransportError
                | ErrorKind::Timeout
                | ErrorKind::RateLimitExceeded
        )
    }

    /// Suggested wait before retrying, when the error carries one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } => Some(*retry_after),
            Self::Dispatch { source, .. } => source.retry_after(),
            _ => None,
        }
    }
}

/// Convenience result alias for chat core operations.
pub type ChatResult<T> = Result<T, ChatError>;
