//! Error taxonomy for the streaming and episode paths.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::episode::EpisodePhase;

/// Longest payload excerpt kept in a [`DecodeError`].
const EXCERPT_MAX_CHARS: usize = 96;

/// Network-level failure. The core never retries; callers decide.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{endpoint}: request failed: {source}")]
    Http {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint}: server returned {status}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("{endpoint}: no response body received")]
    NoBody { endpoint: &'static str },

    #[error("stream ended before the final frame")]
    Truncated,

    #[error("server reported an error: {0}")]
    Remote(String),

    #[error("{endpoint}: unexpected response: {source}")]
    InvalidResponse {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("transport i/o: {0}")]
    Io(#[from] io::Error),
}

/// A `data:` segment whose payload is not valid frame JSON.
#[derive(Debug, Error)]
#[error("malformed frame payload `{excerpt}`: {source}")]
pub struct DecodeError {
    excerpt: String,
    #[source]
    source: serde_json::Error,
}

impl DecodeError {
    pub(crate) fn new(payload: &str, source: serde_json::Error) -> Self {
        let excerpt = match payload.char_indices().nth(EXCERPT_MAX_CHARS) {
            Some((cut, _)) => format!("{}...", &payload[..cut]),
            None => payload.to_string(),
        };
        Self { excerpt, source }
    }

    pub fn excerpt(&self) -> &str {
        &self.excerpt
    }
}

/// The single terminal failure of a streaming session.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

// The byte stream is adapted into `AsyncRead`, which only speaks `io::Error`;
// transport errors ride inside it and are unwrapped here.
impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        if !err
            .get_ref()
            .is_some_and(|inner| inner.is::<TransportError>())
        {
            return StreamError::Transport(TransportError::Io(err));
        }
        match err.into_inner().map(|inner| inner.downcast::<TransportError>()) {
            Some(Ok(transport)) => StreamError::Transport(*transport),
            Some(Err(other)) => StreamError::Transport(TransportError::Io(io::Error::other(other))),
            None => StreamError::Transport(TransportError::Io(io::Error::other(
                "transport failure without detail",
            ))),
        }
    }
}

#[derive(Debug, Error)]
pub enum EpisodeError {
    #[error("cannot {operation} while the episode is {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: EpisodePhase,
    },

    #[error("auto-run is already active")]
    AutoRunActive,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl EpisodeError {
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, EpisodeError::InvalidTransition { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the user config directory")]
    NoConfigDir,

    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid http client settings: {0}")]
    Client(#[source] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_survives_io_adaptation() {
        let wrapped = io::Error::other(TransportError::Remote("gpu out of memory".to_string()));
        match StreamError::from(wrapped) {
            StreamError::Transport(TransportError::Remote(msg)) => {
                assert_eq!(msg, "gpu out of memory")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn plain_io_error_maps_to_io_variant() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(matches!(
            StreamError::from(err),
            StreamError::Transport(TransportError::Io(_))
        ));
    }

    #[test]
    fn decode_error_excerpt_is_bounded() {
        let payload = "x".repeat(500);
        let source = serde_json::from_str::<serde_json::Value>(&payload).unwrap_err();
        let err = DecodeError::new(&payload, source);
        assert!(err.excerpt().len() < 120);
        assert!(err.excerpt().ends_with("..."));
    }
}
