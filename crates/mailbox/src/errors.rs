use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailboxError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid channel name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("channel '{0}' does not exist yet")]
    NotFound(String),

    #[error("channel '{0}' is not a mailbox (bad magic)")]
    BadMagic(String),

    #[error("channel '{0}' is already owned by a live process")]
    AlreadyOwned(String),

    #[error("mailbox capacity must be positive")]
    ZeroCapacity,

    #[error("channel '{name}' exists with {existing} byte capacity, requested {requested}")]
    CapacityMismatch {
        name: String,
        existing: usize,
        requested: usize,
    },

    #[error("unsupported payload shape: {0}")]
    UnsupportedShape(&'static str),

    #[error("payload is {actual} bytes but shape declares {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("payload of {len} bytes exceeds mailbox capacity of {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formatting() {
        let err = MailboxError::NotFound("forward".into());
        assert_eq!(err.to_string(), "channel 'forward' does not exist yet");

        let err = MailboxError::SizeMismatch {
            expected: 64,
            actual: 63,
        };
        assert_eq!(
            err.to_string(),
            "payload is 63 bytes but shape declares 64"
        );
    }

    #[test]
    fn io_error_converts() {
        fn through() -> Result<(), MailboxError> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))?;
            Ok(())
        }
        match through().unwrap_err() {
            MailboxError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("expected Io variant, got {other}"),
        }
    }
}
