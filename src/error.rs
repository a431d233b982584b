use thiserror::Error;

use crate::module::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Only conditions that abort a rewrite pass are errors. Reference-level findings (broken or
/// incompatible references, paranoid flags) are never returned through this type; they are
/// recorded as [`crate::rewrite::HandlerResult`]s in the module's [`crate::rewrite::RewriteReport`].
///
/// # Error Categories
///
/// ## Module Loading Errors
/// - [`Error::Malformed`] - Corrupted or invalid module structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the module boundaries
/// - [`Error::NotSupported`] - Wrong magic or unsupported format version
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::RecursionLimit`] - Signature nesting too deep
///
/// ## I/O Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::WriteFailed`] - The rewritten module could not be persisted
///
/// ## Rewrite Errors
/// - [`Error::ReferenceNotFound`] - A handler tried to replace a reference that is not present
/// - [`Error::StructuralFix`] - A module-level fix could not be applied safely
/// - [`Error::Configuration`] - Invalid facade, platform or pipeline configuration
///
/// # Examples
///
/// ```rust,no_run
/// use modcompat::{Error, Module};
/// use std::path::Path;
///
/// match Module::from_file(Path::new("plugin.pmod")) {
///     Ok(module) => println!("Loaded {}", module.name),
///     Err(Error::NotSupported) => eprintln!("Not a supported module"),
///     Err(Error::Malformed { message, .. }) => eprintln!("Malformed module: {}", message),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The module is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the module.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// This file type is not supported.
    ///
    /// Returned when the magic header does not match or the module was written with a format
    /// version this library cannot read.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// Nested signature types exceeded the supported depth.
    #[error("Reached the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Writing the rewritten module failed.
    ///
    /// The partially written temporary file has already been removed when this error is
    /// returned; the destination path is left untouched.
    #[error("Failed to write module - {message}")]
    WriteFailed {
        /// Description of the failing write step
        message: String,
    },

    /// A reference that a handler wanted to replace is not present in the module.
    ///
    /// This indicates a handler ordering bug: the handler worked on a stale view of the
    /// reference that an earlier handler already replaced.
    #[error("Reference {token} is not present or was already replaced - {description}")]
    ReferenceNotFound {
        /// The token that was looked up
        token: Token,
        /// Description of the reference the handler expected to find
        description: String,
    },

    /// A module-level structural fix could not be applied safely.
    ///
    /// Continuing with an inconsistent structural state would produce an unloadable module, so
    /// this aborts the pass and yields a [`crate::rewrite::Verdict::Fatal`] report.
    #[error("Structural fix '{handler}' failed - {message}")]
    StructuralFix {
        /// Name of the handler that failed
        handler: &'static str,
        /// Why the fix could not be applied
        message: String,
    },

    /// Invalid configuration of the facade registry, platform map or pipeline.
    #[error("Invalid configuration - {0}")]
    Configuration(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
