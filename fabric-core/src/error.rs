//! Error taxonomy shared by every layer of the crate.
//!
//! The shape follows the teacher corpus's `CoreError`: a stable, closed
//! `kind`, a human-readable message, an optional boxed cause, and an
//! optional provider-specific escape hatch for diagnostics that don't fit
//! the closed taxonomy. Unlike the teacher's `no_std + alloc` error type we
//! implement `std::error::Error` directly since this crate targets `std`.

use std::borrow::Cow;
use std::fmt;

/// Closed set of error kinds a fabric operation can fail with.
///
/// Mirrors spec.md §7 verbatim. Kept `#[non_exhaustive]` so a provider-data
/// refinement never becomes a breaking change for downstream matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    Success,
    Again,
    Busy,
    Timeout,
    Canceled,
    InvalidArgument,
    NoMemory,
    NotSupported,
    MessageTooLong,
    AddressNotAvailable,
    ConnectionRefused,
    ConnectionReset,
    IoError,
    State,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Success => "success",
            ErrorKind::Again => "again",
            ErrorKind::Busy => "busy",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Canceled => "canceled",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NoMemory => "no_memory",
            ErrorKind::NotSupported => "not_supported",
            ErrorKind::MessageTooLong => "message_too_long",
            ErrorKind::AddressNotAvailable => "address_not_available",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::IoError => "io_error",
            ErrorKind::State => "state",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Opaque provider diagnostics carried alongside an [`ErrorKind`].
///
/// `errno` is the raw provider-specific numeric code (e.g. a negative
/// `-FI_E*` value); `data` is the provider's `err_data` blob, copied out of
/// the completion record since its lifetime is otherwise tied to the CQ.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderErrorInfo {
    pub errno: i32,
    pub data: Vec<u8>,
}

/// The crate's unified error type.
///
/// Construct with [`Error::new`]; attach a cause with [`Error::with_cause`]
/// or provider diagnostics with [`Error::with_provider_info`].
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    provider: Option<ProviderErrorInfo>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            provider: None,
        }
    }

    /// Construct from a raw provider errno, translating to the closest
    /// domain kind while preserving the raw code for diagnostics (§7).
    pub fn from_provider(errno: i32, kind_hint: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(kind_hint, message).with_provider_info(ProviderErrorInfo {
            errno,
            data: Vec::new(),
        })
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_provider_info(mut self, info: ProviderErrorInfo) -> Self {
        self.provider = Some(info);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider_info(&self) -> Option<&ProviderErrorInfo> {
        self.provider.as_ref()
    }

    pub fn has_provider_error(&self) -> bool {
        self.provider.is_some()
    }

    /// Convenience constructor for the canonical cancellation outcome used
    /// throughout §5/§8 ("the canonical canceled error").
    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "operation canceled")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(info) = &self.provider {
            write!(f, " (provider errno {})", info.errno)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        let kind = match value.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            std::io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
            std::io::ErrorKind::ConnectionReset => ErrorKind::ConnectionReset,
            std::io::ErrorKind::WouldBlock => ErrorKind::Again,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                ErrorKind::InvalidArgument
            }
            _ => ErrorKind::IoError,
        };
        Error::new(kind, value.to_string()).with_cause(value)
    }
}

/// `Result<T, Error>`, with a void specialization for operations that only
/// signal success/failure (spec.md §4.A).
pub type Result<T> = std::result::Result<T, Error>;
pub type VoidResult = Result<()>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::new(ErrorKind::Timeout, "cq wait expired");
        assert_eq!(err.to_string(), "timeout: cq wait expired");
    }

    #[test]
    fn provider_info_round_trips() {
        let err = Error::from_provider(-22, ErrorKind::InvalidArgument, "bad arg");
        assert!(err.has_provider_error());
        assert_eq!(err.provider_info().unwrap().errno, -22);
    }

    #[test]
    fn io_error_would_block_maps_to_again() {
        let io = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Again);
    }
}
