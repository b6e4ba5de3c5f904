//! Exit codes for the tn-node CLI.
//!
//! Exit code ranges:
//! - 0-9: Operational outcomes (parse the outcome from the code, not output)
//! - 10-19: User/environment errors (recoverable by operator action)
//! - 20-29: Internal errors (bugs, should be reported)

/// Exit codes for tn-node operations.
///
/// These codes are a stable contract for field scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-9)
    // ========================================================================
    /// Cycle completed and nothing is left pending.
    Clean = 0,

    /// Cycle completed but records remain pending (link down or backlog).
    Deferred = 1,

    /// Battery critical; the node shut down without touching the queue.
    Shutdown = 2,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// Config file missing, unreadable or invalid
    ConfigError = 11,

    /// Storage volume not mounted
    StorageUnavailable = 12,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// I/O error on a mounted volume
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Codes that mean the command did what it was asked.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean | ExitCode::Deferred)
    }

    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Code name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::Deferred => "OK_DEFERRED",
            ExitCode::Shutdown => "OK_SHUTDOWN",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::StorageUnavailable => "ERR_STORAGE_UNAVAILABLE",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges() {
        assert!(ExitCode::Clean.is_success());
        assert!(ExitCode::Deferred.is_success());
        assert!(!ExitCode::Shutdown.is_success());
        assert!(ExitCode::Shutdown.is_operational());
        assert!(ExitCode::ConfigError.is_user_error());
        assert!(ExitCode::StorageUnavailable.is_user_error());
        assert!(ExitCode::IoError.is_internal_error());
    }

    #[test]
    fn test_every_code_is_stable() {
        let codes = [
            (ExitCode::Clean, 0, "OK_CLEAN"),
            (ExitCode::Deferred, 1, "OK_DEFERRED"),
            (ExitCode::Shutdown, 2, "OK_SHUTDOWN"),
            (ExitCode::ArgsError, 10, "ERR_ARGS"),
            (ExitCode::ConfigError, 11, "ERR_CONFIG"),
            (ExitCode::StorageUnavailable, 12, "ERR_STORAGE_UNAVAILABLE"),
            (ExitCode::IoError, 21, "ERR_IO"),
        ];
        for (code, value, name) in codes {
            assert_eq!(code.as_i32(), value);
            assert_eq!(code.code_name(), name);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitCode::Deferred.to_string(), "OK_DEFERRED (1)");
        assert_eq!(i32::from(ExitCode::ConfigError), 11);
    }
}
