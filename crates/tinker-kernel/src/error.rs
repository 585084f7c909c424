//! Kernel error types.
//!
//! Two kinds of error live here.  [`KernelError`] is returned by the host-side
//! APIs of this crate (resource admission, configuration loading).
//! [`CapabilityError`] is the script-facing error: it carries exactly the
//! message a running program sees when a capability call fails.

/// Unified error type for the Tinker kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Resource errors ----------------------------------------------------
    /// The resource group is already holding as many resources as allowed.
    #[error("resource limit reached ({limit} in use)")]
    CapacityExceeded {
        /// The limit that was in force when admission was attempted.
        limit: usize,
    },

    /// The resource group has been shut down and will not accept new work.
    #[error("resource group is shut down")]
    GroupClosed,

    /// The resource was closed before it could take a slot.
    #[error("resource is already closed")]
    ResourceClosed,

    // -- Configuration errors -----------------------------------------------
    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// A configuration file could not be parsed.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// An I/O error occurred (e.g. reading a config file from disk).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;

/// An error raised by a capability method and reported to the calling
/// script.
///
/// The message is shown to the program verbatim, so it should read like the
/// rest of the scripting API (`"bad argument #1 (string expected, got nil)"`)
/// rather than like a Rust error chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CapabilityError {
    message: String,
}

impl CapabilityError {
    /// Create a new error with the given script-facing message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message shown to the script.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<KernelError> for CapabilityError {
    fn from(err: KernelError) -> Self {
        Self::new(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_error_display() {
        let err = KernelError::CapacityExceeded { limit: 16 };
        assert_eq!(err.to_string(), "resource limit reached (16 in use)");
    }

    #[test]
    fn closed_error_display() {
        assert_eq!(
            KernelError::GroupClosed.to_string(),
            "resource group is shut down"
        );
    }

    #[test]
    fn capability_error_is_bare_message() {
        let err = CapabilityError::new("Unsupported HTTP method");
        assert_eq!(err.to_string(), "Unsupported HTTP method");
        assert_eq!(err.message(), "Unsupported HTTP method");
    }

    #[test]
    fn io_error_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "config gone");
        let err = KernelError::from(io_err);
        assert!(err.to_string().contains("config gone"));
    }
}
