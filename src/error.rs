//! Crate-level error types.
//!
//! Every fallible operation returns exactly one of these kinds. They mirror the
//! return codes of the vendor device API, but are carried as a tagged result
//! instead of negative integers overloaded with return values.

/// Crate-level error type.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The session is not in a state that allows the operation to begin.
    #[error("not initialised: {0}")]
    NotInitialised(String),

    /// Device ids were requested before any enumeration took place.
    #[error("devices have not been enumerated")]
    NotEnumerated,

    /// The device handle is unknown, already closed, or cannot be closed now.
    #[error("invalid device handle: {0}")]
    InvalidHandle(String),

    /// A streaming operation was attempted while output is not started.
    #[error("output was not started")]
    NotStarted,

    /// Communication with the device failed.
    #[error("device I/O failed: {0}")]
    Io(String),

    /// A parameter is outside the range the device accepts.
    #[error("parameter out of range: {0}")]
    ParameterOutOfRange(String),

    /// A parameter is malformed (empty, wrong direction, embedded NUL...).
    #[error("invalid parameter: {0}")]
    ParameterInvalid(String),
}

impl Error {
    /// Create an I/O error from any displayable cause.
    pub fn io(msg: impl Into<String>) -> Self {
        Error::Io(msg.into())
    }

    /// Create a parameter-out-of-range error.
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Error::ParameterOutOfRange(msg.into())
    }

    /// Create an invalid-parameter error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::ParameterInvalid(msg.into())
    }

    /// Create an invalid-handle error.
    pub fn invalid_handle(msg: impl Into<String>) -> Self {
        Error::InvalidHandle(msg.into())
    }

    /// Create a not-initialised error.
    pub fn not_initialised(msg: impl Into<String>) -> Self {
        Error::NotInitialised(msg.into())
    }

    /// Returns true if this is a NotStarted error.
    pub fn is_not_started(&self) -> bool {
        matches!(self, Error::NotStarted)
    }

    /// Returns true if this is an Io error.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Returns true if this is an InvalidHandle error.
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, Error::InvalidHandle(_))
    }

    /// The numeric return code the vendor API uses for this kind.
    ///
    /// Useful when bridging to C callers that expect the legacy codes.
    pub fn code(&self) -> i32 {
        match self {
            Error::NotInitialised(_) => -1,
            Error::NotEnumerated => -2,
            Error::InvalidHandle(_) => -3,
            Error::NotStarted => -4,
            Error::Io(_) => -5,
            Error::ParameterOutOfRange(_) => -6,
            Error::ParameterInvalid(_) => -7,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_vendor_return_codes() {
        assert_eq!(Error::not_initialised("x").code(), -1);
        assert_eq!(Error::NotEnumerated.code(), -2);
        assert_eq!(Error::invalid_handle("x").code(), -3);
        assert_eq!(Error::NotStarted.code(), -4);
        assert_eq!(Error::io("x").code(), -5);
        assert_eq!(Error::out_of_range("x").code(), -6);
        assert_eq!(Error::invalid("x").code(), -7);
    }

    #[test]
    fn test_std_io_error_maps_to_io() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone").into();
        assert!(err.is_io());
        assert!(err.to_string().contains("pipe gone"));
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::out_of_range("sample rate 0 Hz");
        assert_eq!(err.to_string(), "parameter out of range: sample rate 0 Hz");
    }
}
