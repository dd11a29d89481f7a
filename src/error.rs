//! Typed failures that callers need to tell apart from ordinary errors.
//!
//! Everything else travels as `anyhow::Error`; these variants are raised with
//! `anyhow::Error::from` and recovered at the boundaries with `downcast_ref`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// No persisted index exists yet. Recoverable by scanning.
    #[error("index not found at {}: run a scan first", path.display())]
    Unavailable { path: PathBuf },

    /// The persisted file exists but cannot be used as an index.
    #[error("index at {} is unreadable: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl IndexError {
    /// Finds an `IndexError` anywhere in an error chain.
    pub fn find(err: &anyhow::Error) -> Option<&IndexError> {
        err.chain().find_map(|cause| cause.downcast_ref::<IndexError>())
    }
}

/// Renders an error for users: the typed message when there is one, the
/// context chain otherwise.
pub fn user_message(err: &anyhow::Error) -> String {
    match IndexError::find(err) {
        Some(index_err) => index_err.to_string(),
        None => format!("{err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn unavailable_message_names_remediation() {
        let err = IndexError::Unavailable {
            path: PathBuf::from("/tmp/memory/reposcope.sqlite"),
        };
        assert!(err.to_string().ends_with("run a scan first"));
    }

    #[test]
    fn find_sees_through_context() {
        let err = anyhow::Error::from(IndexError::Cancelled);
        let err = Err::<(), _>(err).context("scan").unwrap_err();
        assert!(matches!(IndexError::find(&err), Some(IndexError::Cancelled)));
        assert_eq!(user_message(&err), "operation cancelled");
    }
}
