//! Error types for the dynamic loader.
//!
//! Every failure carries a stable diagnostic code (see [`HdlError::code`]) that
//! is attached to the log line reporting it, so operators can grep for a
//! failure class regardless of the message wording.

/// Which half of a dependency record disagreed with the ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyMismatch {
    /// The version string differs from the one recorded first.
    #[error("dependency check failed for {name}, version({found}) expected({expected})")]
    Version {
        name: String,
        found: String,
        expected: String,
    },

    /// The structure size differs from the one recorded first.
    #[error("dependency check failed for {name}, size({found}) expected({expected})")]
    Size {
        name: String,
        found: usize,
        expected: usize,
    },
}

impl DependencyMismatch {
    /// Name of the dependency that failed the check.
    pub fn dependency(&self) -> &str {
        match self {
            DependencyMismatch::Version { name, .. } | DependencyMismatch::Size { name, .. } => {
                name
            }
        }
    }
}

/// Loader error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HdlError {
    /// A module with the same display name is already in the chain.
    #[error("{0} already loaded")]
    AlreadyLoaded(String),

    /// No open attempt succeeded.
    #[error("unable to open module {name}: {reason}")]
    OpenError { name: String, reason: String },

    /// The module exposes no dependency-declaration hook.
    #[error("no dependency section in {0}")]
    NoDependencySection(String),

    /// The same binary is already loaded under another name.
    #[error("module {name} is duplicate of {existing}")]
    DuplicateModule { name: String, existing: String },

    /// The module disagrees with the dependency ledger.
    #[error("dependency check failed for module {module}: {mismatch}")]
    DependencyMismatch {
        module: String,
        mismatch: DependencyMismatch,
    },

    /// The module is the core module or was loaded with `no_unload`.
    #[error("unloading of {0} not allowed")]
    ProtectedModule(String),

    /// An active device still uses one of the module's handlers.
    #[error("device {device:04X} bound to {module}")]
    DeviceBound { module: String, device: u16 },

    /// The module's finalize hook vetoed the unload.
    #[error("unload of {module} rejected by final section (status {status})")]
    FinalizeRejected { module: String, status: i32 },

    /// Nothing matched the requested name.
    #[error("{0} not found")]
    NotFound(String),

    /// The registry could not grow its module chain.
    #[error("cannot allocate memory for module descriptor {0}")]
    AllocationFailure(String),

    /// A loader operation was entered from inside a module callback.
    #[error("loader is busy with a transaction on this thread, {0} rejected")]
    ReentrantTransaction(String),

    /// Unknown or conflicting load option.
    #[error("invalid load option: {0}")]
    InvalidOptions(String),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl HdlError {
    /// Stable diagnostic code for this error class.
    pub fn code(&self) -> &'static str {
        match self {
            HdlError::AllocationFailure(_) => "HDL006S",
            HdlError::AlreadyLoaded(_) => "HDL005E",
            HdlError::OpenError { .. } => "HDL007E",
            HdlError::DeviceBound { .. } => "HDL008E",
            HdlError::NotFound(_) => "HDL009E",
            HdlError::NoDependencySection(_) => "HDL013E",
            HdlError::DependencyMismatch { .. } => "HDL014E",
            HdlError::ProtectedModule(_) => "HDL015E",
            HdlError::DuplicateModule { .. } => "HDL016E",
            HdlError::FinalizeRejected { .. } => "HDL017E",
            HdlError::ReentrantTransaction(_) => "HDL019E",
            HdlError::InvalidOptions(_) => "HDL020E",
            HdlError::Config(_) => "HDL021E",
        }
    }

    /// True for failures the process cannot continue from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HdlError::AllocationFailure(_))
    }
}

/// Result type alias for loader operations.
pub type Result<T> = std::result::Result<T, HdlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_names_dependency() {
        let err = DependencyMismatch::Size {
            name: "REGS".to_string(),
            found: 12,
            expected: 16,
        };
        assert_eq!(err.dependency(), "REGS");
        assert_eq!(
            err.to_string(),
            "dependency check failed for REGS, size(12) expected(16)"
        );
    }

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            HdlError::AlreadyLoaded("a".into()),
            HdlError::OpenError {
                name: "a".into(),
                reason: "b".into(),
            },
            HdlError::NoDependencySection("a".into()),
            HdlError::DuplicateModule {
                name: "a".into(),
                existing: "b".into(),
            },
            HdlError::ProtectedModule("a".into()),
            HdlError::DeviceBound {
                module: "a".into(),
                device: 0x0180,
            },
            HdlError::FinalizeRejected {
                module: "a".into(),
                status: 4,
            },
            HdlError::NotFound("a".into()),
            HdlError::AllocationFailure("a".into()),
            HdlError::ReentrantTransaction("a".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(HdlError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_device_bound_formats_hex() {
        let err = HdlError::DeviceBound {
            module: "hdt_tape".into(),
            device: 0x0180,
        };
        assert_eq!(err.to_string(), "device 0180 bound to hdt_tape");
        assert!(!err.is_fatal());
        assert!(HdlError::AllocationFailure("*Hercules".into()).is_fatal());
    }
}
