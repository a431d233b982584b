//! Compatibility rewriting of plugin modules.
//!
//! A [`RewriteSession`] holds everything that is shared across plugins (the trusted symbol
//! universe, the facade registry and the platform map) and runs one [`RewritePipeline`] per
//! module. Each run produces a [`RewriteReport`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          RewritePipeline                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  StructuralFix     architecture       module flags               │
//! │        │                                                         │
//! │        ▼           per reference, first claim wins               │
//! │  HeuristicRepair   field-property, optional-params               │
//! │  SignatureMapping  facade                                        │
//! │  PlatformRemap     platform                                      │
//! │        │                                                         │
//! │        ▼                                                         │
//! │  settle            drop retired rows, verify edited bodies       │
//! │        │                                                         │
//! │        ▼                                                         │
//! │  Detection         classifier, type-finder (final state only)    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rewrite handlers run in [`HandlerMode::Rewrite`] when
//! [`RewriteConfig::rewrite_enabled`] is set and in [`HandlerMode::DetectOnly`] otherwise; in
//! detect-only mode they report what they would change without touching the module. Detection
//! handlers never change anything.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::path::Path;
//! use modcompat::rewrite::{RewriteConfig, RewriteSession};
//! use modcompat::Module;
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
//! println!("{}: {}", report.module(), report.verdict());
//! for finding in report.findings() {
//!     println!("  {finding}");
//! }
//! # Ok::<(), modcompat::Error>(())
//! ```

mod config;
mod context;
mod handler;
pub mod handlers;
mod pipeline;
mod report;
mod session;

pub use config::{current_platform, RewriteConfig};
pub use context::{RewriteContext, SharedResources};
pub use handler::{HandlerCapabilities, HandlerMode, HandlerResult, InstructionHandler, Stage};
pub use pipeline::RewritePipeline;
pub use report::{RewriteRecord, RewriteReport, Verdict};
pub use session::{RewriteJob, RewriteSession, RewriteSessionBuilder};
