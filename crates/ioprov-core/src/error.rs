//! Provider error kinds.
//!
//! Errors are returned, never thrown, across the provider boundary: a
//! plain enum with a manual `Display` impl, no `thiserror`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderError {
    /// `initialize` called twice without an intervening `shutdown`.
    AlreadyInitialized,
    /// A submit/drain call was made before `initialize` or after `shutdown`.
    NotInitialized,
    /// A caller-supplied argument (buffer id, socket, flags) is nonsensical.
    InvalidParameter,
    /// The socket handle is invalid or unknown to the provider.
    InvalidSocket,
    /// The buffer pointer is null or the length is zero.
    InvalidBuffer,
    /// The host kernel lacks the completion API this provider wraps.
    PlatformNotSupported,
    /// A kernel call failed, or the completion queue reported corruption.
    OperationFailed,
    /// An OS error occurred; carries the raw errno/GetLastError value.
    Os(i32),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "provider already initialized"),
            Self::NotInitialized => write!(f, "provider not initialized"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::InvalidSocket => write!(f, "invalid socket"),
            Self::InvalidBuffer => write!(f, "invalid buffer"),
            Self::PlatformNotSupported => write!(f, "platform not supported"),
            Self::OperationFailed => write!(f, "operation failed"),
            Self::Os(errno) => write!(f, "OS error: errno {errno}"),
        }
    }
}

impl std::error::Error for ProviderError {}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    /// Stable small negative code used by `process_completions`'s `i32`
    /// return to carry an error out of a plain integer count. Callers
    /// compare against these constants rather than relying on enum
    /// discriminant values.
    pub fn as_negative_code(self) -> i32 {
        let code = match self {
            Self::AlreadyInitialized => 1,
            Self::NotInitialized => 2,
            Self::InvalidParameter => 3,
            Self::InvalidSocket => 4,
            Self::InvalidBuffer => 5,
            Self::PlatformNotSupported => 6,
            Self::OperationFailed => 7,
            Self::Os(_) => 8,
        };
        -code
    }
}
