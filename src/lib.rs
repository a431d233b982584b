// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' and 'file/output.rs' use mmap to map files into memory

//! # modcompat
//!
//! A binary compatibility rewriting engine that keeps compiled plugin modules loadable after
//! the host application they were built against has changed.
//!
//! Plugins are distributed as compiled `PMOD` modules that reference types and members of the
//! host by name and signature. When the host renames a method, turns a field into a property,
//! adds an optional parameter or retires a platform module, those references stop resolving.
//! `modcompat` loads a plugin, checks every external reference against the trusted host
//! modules, rewrites what can be repaired safely and reports everything else.
//!
//! ## Features
//!
//! - **Canonical module I/O** - Modules round-trip byte for byte; untouched plugins are copied verbatim
//! - **Reference classification** - Every reference into a trusted module is resolved or reported
//! - **Heuristic repair** - Removed fields become accessor calls, added optional parameters get their defaults
//! - **Facades** - Renamed members and retired types are redirected to registered replacements
//! - **Platform remapping** - References to retired platform modules move to the matching target
//! - **Sandbox detection** - Paranoid mode flags console, filesystem and process access
//! - **Batch processing** - Many plugins share one session and run in parallel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modcompat::prelude::*;
//! use std::path::Path;
//!
//! let host = Module::from_file(Path::new("host/Host.pmod"))?;
//! let session = RewriteSession::builder(RewriteConfig::default().with_trusted(["Host"]))
//!     .trusted_module(host)
//!     .build()?;
//!
//! let report = session.process_file(
//!     Path::new("plugins/Sample.pmod"),
//!     Some(Path::new("out/Sample.pmod")),
//! )?;
//! println!("{} {}: {}", report.module(), report.version(), report.verdict());
//! # Ok::<(), modcompat::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`module`] - The in-memory module model, the file format reader and writer, and reference editing
//! - [`code`] - Instructions, body editing and stack verification
//! - [`symbols`] - The trusted symbol universe and reference classification
//! - [`facade`] - Member and type facade registrations
//! - [`platform`] - Retired platform modules and their targets
//! - [`rewrite`] - Handlers, the staged pipeline, reports and sessions
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Only conditions that abort a pass are
//! errors; reference-level findings end up in the [`rewrite::RewriteReport`].

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use modcompat::prelude::*;
///
/// let config = RewriteConfig::strict().with_trusted(["Host"]);
/// let session = RewriteSession::builder(config).build()?;
/// # Ok::<(), modcompat::Error>(())
/// ```
pub mod prelude;

pub mod code;
pub mod facade;
pub mod module;
pub mod platform;
pub mod rewrite;
pub mod symbols;

/// `modcompat` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `modcompat` Error type
///
/// Covers module loading, writing and the conditions that abort a rewrite pass.
pub use error::Error;

/// An opened module file.
pub use file::File;

/// Bounds-checked little-endian reader over module bytes.
pub use file::parser::Parser;

/// The in-memory plugin module.
pub use module::Module;
