//! The module model: reading, inspecting, editing and writing plugin modules.
//!
//! A [`Module`] is the fully owned, in-memory form of one module file. Loading parses the
//! complete file (header, heaps, tables and method bodies) and releases the file handle before
//! returning, so a module never pins the file it came from. Handlers mutate the module in place;
//! [`Module::save`] writes it back through a staged temporary file.
//!
//! # Key Types
//! - [`Module`] - The module and its tables
//! - [`Token`] / [`TableId`] - Row addresses, shared with the instruction operands
//! - [`SymbolReference`] - A resolved view of one module, type, field or method reference
//! - [`ModuleBuilder`] - Fluent in-memory construction of modules
//!
//! # Examples
//!
//! ```rust,no_run
//! use modcompat::Module;
//! use std::path::Path;
//!
//! let module = Module::from_file(Path::new("plugin.pmod"))?;
//! for reference in module.enumerate_references() {
//!     println!("{reference}");
//! }
//! # Ok::<(), modcompat::Error>(())
//! ```

mod builder;
mod heaps;
mod identity;
mod reader;
mod references;
mod signature;
mod tables;
mod token;
mod writer;

pub use builder::{ModuleBuilder, TypeDefBuilder};
pub use heaps::UserStrings;
pub use identity::{
    FieldAttributes, MethodAttributes, ModuleFlags, Platform, TypeAttributes, Version,
};
pub use references::{
    MemberReference, MemberShape, ModuleReference, ReferenceKind, ReferenceRow,
    SymbolReference, TypeReference,
};
pub use signature::{
    encode_type, Constant, FieldSignature, MemberSignature, MethodSignature, SignatureParser,
    TypeSignature, ELEMENT_TYPE, SIGNATURE_HEADER,
};
pub use tables::{
    full_name, split_full_name, FieldDef, MemberRef, MethodDef, ModuleRef, ParamDef, TypeDef,
    TypeRef,
};
pub use token::{TableId, Token};

use std::path::Path;

use log::debug;

use crate::{
    code::CallResolver,
    file::{output::write_atomic, File},
    Result,
};

/// Magic bytes at the start of every module file
pub const MODULE_MAGIC: &[u8; 4] = b"PMOD";

/// The only module format version this library reads and writes
pub const FORMAT_VERSION: u16 = 1;

/// A plugin, host or facade module.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Short name of the module
    pub name: String,
    /// Version of the module
    pub version: Version,
    /// Runtime requirements
    pub flags: ModuleFlags,
    /// ModuleRef table
    pub module_refs: Vec<ModuleRef>,
    /// TypeRef table
    pub type_refs: Vec<TypeRef>,
    /// MemberRef table
    pub member_refs: Vec<MemberRef>,
    /// TypeDef table, each type owning its fields and methods
    pub types: Vec<TypeDef>,
    /// The `#US` heap
    pub user_strings: UserStrings,
}

impl Module {
    /// An empty IL-only module.
    #[must_use]
    pub fn new(name: &str, version: Version) -> Self {
        Module {
            name: name.to_string(),
            version,
            flags: ModuleFlags::IL_ONLY,
            module_refs: Vec::new(),
            type_refs: Vec::new(),
            member_refs: Vec::new(),
            types: Vec::new(),
            user_strings: UserStrings::new(),
        }
    }

    /// Load a module from disk.
    ///
    /// The file is memory-mapped for the duration of parsing only; the mapping is released
    /// before this returns, on success and on failure.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read,
    /// [`crate::Error::NotSupported`] for a foreign file or format version, and
    /// [`crate::Error::Malformed`] / [`crate::Error::OutOfBounds`] for corrupt content.
    pub fn from_file(path: &Path) -> Result<Module> {
        let file = File::from_file(path)?;
        let module = reader::read_module(file.data());
        drop(file);

        if let Ok(module) = &module {
            debug!(
                "Loaded module '{}' {} from {}",
                module.name,
                module.version,
                path.display()
            );
        }
        module
    }

    /// Load a module from an owned buffer.
    ///
    /// # Errors
    /// See [`Module::from_file`].
    pub fn from_mem(data: Vec<u8>) -> Result<Module> {
        let file = File::from_mem(data)?;
        reader::read_module(file.data())
    }

    /// Load a module from a byte slice.
    ///
    /// # Errors
    /// See [`Module::from_file`].
    pub fn from_bytes(data: &[u8]) -> Result<Module> {
        reader::read_module(data)
    }

    /// Serialize the module.
    ///
    /// The output is canonical: loading it and serializing again yields identical bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a table or body holds a value that cannot be
    /// encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        writer::write_module(self)
    }

    /// Write the module to `path` atomically.
    ///
    /// # Errors
    /// Returns the serialization error, or [`crate::Error::WriteFailed`] if the file cannot be
    /// written. `path` is unchanged on failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        write_atomic(path, &bytes)?;
        debug!("Saved module '{}' to {}", self.name, path.display());
        Ok(())
    }

    /// Token of the TypeDef at `index`.
    #[must_use]
    pub fn type_def_token(&self, index: usize) -> Token {
        Token::from_index(TableId::TypeDef, index)
    }

    /// Index of the TypeDef a token points at.
    #[must_use]
    pub fn type_def_index(&self, token: Token) -> Option<usize> {
        if !token.is_table(TableId::TypeDef) {
            return None;
        }
        token.index().filter(|index| *index < self.types.len())
    }

    /// Index of the type definition called `full_name`.
    #[must_use]
    pub fn find_type_def(&self, full_name: &str) -> Option<usize> {
        self.types
            .iter()
            .position(|type_def| type_def.full_name() == full_name)
    }

    /// The ModuleRef a token points at.
    #[must_use]
    pub fn module_ref(&self, token: Token) -> Option<&ModuleRef> {
        if !token.is_table(TableId::ModuleRef) {
            return None;
        }
        self.module_refs.get(token.index()?)
    }

    /// The TypeRef a token points at.
    #[must_use]
    pub fn type_ref(&self, token: Token) -> Option<&TypeRef> {
        if !token.is_table(TableId::TypeRef) {
            return None;
        }
        self.type_refs.get(token.index()?)
    }

    /// The MemberRef a token points at.
    #[must_use]
    pub fn member_ref(&self, token: Token) -> Option<&MemberRef> {
        if !token.is_table(TableId::MemberRef) {
            return None;
        }
        self.member_refs.get(token.index()?)
    }

    /// Total number of field definitions.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.types.iter().map(|type_def| type_def.fields.len()).sum()
    }

    /// Total number of method definitions.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.types.iter().map(|type_def| type_def.methods.len()).sum()
    }

    /// Token of a field definition.
    #[must_use]
    pub fn field_token(&self, type_index: usize, field_index: usize) -> Token {
        let before: usize = self.types[..type_index.min(self.types.len())]
            .iter()
            .map(|type_def| type_def.fields.len())
            .sum();
        Token::from_index(TableId::Field, before + field_index)
    }

    /// Token of a method definition.
    #[must_use]
    pub fn method_token(&self, type_index: usize, method_index: usize) -> Token {
        let before: usize = self.types[..type_index.min(self.types.len())]
            .iter()
            .map(|type_def| type_def.methods.len())
            .sum();
        Token::from_index(TableId::MethodDef, before + method_index)
    }

    /// `(type index, field index)` of a Field token.
    #[must_use]
    pub fn field_def(&self, token: Token) -> Option<(usize, usize)> {
        if !token.is_table(TableId::Field) {
            return None;
        }
        let mut remaining = token.index()?;
        for (type_index, type_def) in self.types.iter().enumerate() {
            if remaining < type_def.fields.len() {
                return Some((type_index, remaining));
            }
            remaining -= type_def.fields.len();
        }
        None
    }

    /// `(type index, method index)` of a MethodDef token.
    #[must_use]
    pub fn method_def(&self, token: Token) -> Option<(usize, usize)> {
        if !token.is_table(TableId::MethodDef) {
            return None;
        }
        let mut remaining = token.index()?;
        for (type_index, type_def) in self.types.iter().enumerate() {
            if remaining < type_def.methods.len() {
                return Some((type_index, remaining));
            }
            remaining -= type_def.methods.len();
        }
        None
    }

    /// Full name of the type a TypeDef or TypeRef token points at.
    #[must_use]
    pub fn type_name(&self, token: Token) -> Option<String> {
        match token.table_id()? {
            TableId::TypeDef => Some(self.types.get(self.type_def_index(token)?)?.full_name()),
            TableId::TypeRef => Some(self.type_ref(token)?.full_name()),
            _ => None,
        }
    }

    /// The module a TypeRef token is scoped to, `None` for local types and TypeDefs.
    #[must_use]
    pub fn declaring_module(&self, token: Token) -> Option<&ModuleRef> {
        let type_ref = self.type_ref(token)?;
        self.module_ref(type_ref.scope)
    }

    /// Render a signature type as a full type name.
    #[must_use]
    pub fn render_type(&self, signature: &TypeSignature) -> String {
        signature.render(&|token| self.type_name(token))
    }

    /// Returns `true` if `token` addresses an existing row or user string.
    #[must_use]
    pub fn contains_token(&self, token: Token) -> bool {
        let Some(table) = token.table_id() else {
            return false;
        };
        let Some(index) = token.index() else {
            return false;
        };

        match table {
            TableId::ModuleRef => index < self.module_refs.len(),
            TableId::TypeRef => index < self.type_refs.len(),
            TableId::MemberRef => index < self.member_refs.len(),
            TableId::TypeDef => index < self.types.len(),
            TableId::Field => index < self.field_count(),
            TableId::MethodDef => index < self.method_count(),
            TableId::Param => false,
            TableId::UserString => self.user_strings.get_token(token).is_some(),
        }
    }

    /// Every method with its `(type index, method index)`.
    pub fn methods(&self) -> impl Iterator<Item = (usize, usize, &MethodDef)> {
        self.types.iter().enumerate().flat_map(|(type_index, type_def)| {
            type_def
                .methods
                .iter()
                .enumerate()
                .map(move |(method_index, method)| (type_index, method_index, method))
        })
    }

    /// Verify the body of one method, returning its maximum stack depth.
    ///
    /// Methods without a body verify trivially with depth 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the indices are invalid or the body is not
    /// structurally valid.
    pub fn verify_method(&self, type_index: usize, method_index: usize) -> Result<u16> {
        let Some(method) = self
            .types
            .get(type_index)
            .and_then(|type_def| type_def.methods.get(method_index))
        else {
            return Err(malformed_error!(
                "No method {} in type {}",
                method_index,
                type_index
            ));
        };

        match &method.body {
            Some(body) => body.verify(&method.signature, self),
            None => Ok(0),
        }
    }

    /// Verify every method body, raising each body's `max_stack` to the depth it needs.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] naming the first method whose body is invalid.
    pub fn verify_bodies(&mut self) -> Result<()> {
        let mut required = Vec::new();
        for (type_index, method_index, method) in self.methods() {
            let depth = self.verify_method(type_index, method_index).map_err(|e| {
                malformed_error!(
                    "{}::{} failed verification - {}",
                    self.types[type_index].full_name(),
                    method.name,
                    e
                )
            })?;
            required.push((type_index, method_index, depth));
        }

        for (type_index, method_index, depth) in required {
            if let Some(body) = self.types[type_index].methods[method_index].body.as_mut() {
                body.max_stack = body.max_stack.max(depth);
            }
        }
        Ok(())
    }
}

impl CallResolver for Module {
    fn method_signature(&self, token: Token) -> Option<MethodSignature> {
        match token.table_id()? {
            TableId::MethodDef => {
                let (type_index, method_index) = self.method_def(token)?;
                Some(self.types[type_index].methods[method_index].signature.clone())
            }
            TableId::MemberRef => match &self.member_ref(token)?.signature {
                MemberSignature::Method(signature) => Some(signature.clone()),
                MemberSignature::Field(_) => None,
            },
            _ => None,
        }
    }
}
