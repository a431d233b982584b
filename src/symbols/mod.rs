//! The trusted symbol universe and reference classification.
//!
//! A [`SymbolUniverse`] holds the loaded, known-good modules of the current host together with
//! the allow-list of module names whose references are checked. Classification answers one
//! question per reference: does the symbol it names exist in the trusted universe with the
//! shape the reference expects?
//!
//! # Key Types
//! - [`SymbolUniverse`] - Trusted modules and member lookup along base-type chains
//! - [`Classification`] - The outcome of checking one reference
//! - [`TypeLocation`], [`FieldLocation`], [`MethodLocation`] - Definitions found in the universe

mod classify;
mod universe;

pub use classify::Classification;
pub use universe::{FieldLocation, MethodLocation, SymbolUniverse, TypeLocation};
