//! Resolved views of a module's external references and the operations that edit them.
//!
//! The raw ModuleRef, TypeRef and MemberRef rows hold module-local tokens. A
//! [`SymbolReference`] resolves those tokens into names (declaring module, declaring type, member
//! name and rendered signature shape) so references can be compared across modules. Handlers
//! read references through [`Module::enumerate_references`] and write them back through
//! [`Module::replace_reference`], which refuses stale views.

use std::fmt;

use strum::{Display, EnumIter};

use crate::{
    module::{
        full_name, FieldSignature, MemberRef, MemberSignature, MethodSignature, Module,
        ModuleRef, TableId, Token, TypeRef, TypeSignature, Version,
    },
    Error, Result,
};

/// A resolved ModuleRef row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleReference {
    /// The ModuleRef token
    pub token: Token,
    /// Short name of the referenced module
    pub name: String,
    /// Minimum required version
    pub version: Version,
}

/// A resolved TypeRef row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeReference {
    /// The TypeRef token
    pub token: Token,
    /// Declaring module, `None` for a type of the referencing module itself
    pub module: Option<String>,
    /// Version required of the declaring module
    pub module_version: Option<Version>,
    /// Namespace of the type
    pub namespace: String,
    /// Name of the type
    pub name: String,
}

impl TypeReference {
    /// `Namespace.Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.name)
    }
}

/// The caller-visible shape of a member, with every type rendered as a full name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberShape {
    /// A field of the given type
    Field {
        /// Full name of the field type
        field_type: String,
    },
    /// A method
    Method {
        /// Instance method
        has_this: bool,
        /// Full name of the return type
        return_type: String,
        /// Full names of the parameter types, in order
        params: Vec<String>,
    },
}

impl MemberShape {
    /// Shape of a field signature, rendering types through `module`.
    #[must_use]
    pub fn of_field(module: &Module, signature: &FieldSignature) -> Self {
        MemberShape::Field {
            field_type: module.render_type(&signature.field_type),
        }
    }

    /// Shape of a method signature, rendering types through `module`.
    #[must_use]
    pub fn of_method(module: &Module, signature: &MethodSignature) -> Self {
        MemberShape::Method {
            has_this: signature.has_this,
            return_type: module.render_type(&signature.return_type),
            params: signature
                .params
                .iter()
                .map(|param| module.render_type(param))
                .collect(),
        }
    }

    /// Shape of either kind of member signature.
    #[must_use]
    pub fn of(module: &Module, signature: &MemberSignature) -> Self {
        match signature {
            MemberSignature::Field(field) => MemberShape::of_field(module, field),
            MemberSignature::Method(method) => MemberShape::of_method(module, method),
        }
    }

    /// The lookup key of member `name` of `declaring_type` with this shape.
    #[must_use]
    pub fn key(&self, declaring_type: &str, name: &str) -> String {
        match self {
            MemberShape::Field { .. } => format!("{declaring_type}::{name}"),
            MemberShape::Method { params, .. } => {
                format!("{declaring_type}::{name}({})", params.join(","))
            }
        }
    }

    /// Parameter types of a method shape, empty for fields.
    #[must_use]
    pub fn params(&self) -> &[String] {
        match self {
            MemberShape::Method { params, .. } => params,
            MemberShape::Field { .. } => &[],
        }
    }
}

/// A resolved MemberRef row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberReference {
    /// The MemberRef token
    pub token: Token,
    /// Token of the declaring type (TypeRef or TypeDef)
    pub parent: Token,
    /// Module declaring the parent type, `None` for local types
    pub module: Option<String>,
    /// Full name of the declaring type
    pub declaring_type: String,
    /// Member name
    pub name: String,
    /// The raw signature, tokens local to the referencing module
    pub signature: MemberSignature,
    /// The rendered signature
    pub shape: MemberShape,
}

impl MemberReference {
    /// `Ns.Type::Name(T1,T2)` for methods, `Ns.Type::Name` for fields.
    #[must_use]
    pub fn key(&self) -> String {
        self.shape.key(&self.declaring_type, &self.name)
    }

    /// Returns `true` for field references.
    #[must_use]
    pub fn is_field(&self) -> bool {
        self.signature.is_field()
    }
}

/// The kind of a [`SymbolReference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ReferenceKind {
    /// ModuleRef
    Module,
    /// TypeRef
    Type,
    /// MemberRef with a field signature
    Field,
    /// MemberRef with a method signature
    Method,
}

/// One external reference of a module, resolved to names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolReference {
    /// A module reference
    Module(ModuleReference),
    /// A type reference
    Type(TypeReference),
    /// A field reference
    Field(MemberReference),
    /// A method reference
    Method(MemberReference),
}

impl SymbolReference {
    /// The token of the underlying row.
    #[must_use]
    pub fn token(&self) -> Token {
        match self {
            SymbolReference::Module(module) => module.token,
            SymbolReference::Type(type_ref) => type_ref.token,
            SymbolReference::Field(member) | SymbolReference::Method(member) => member.token,
        }
    }

    /// The kind of reference.
    #[must_use]
    pub fn kind(&self) -> ReferenceKind {
        match self {
            SymbolReference::Module(_) => ReferenceKind::Module,
            SymbolReference::Type(_) => ReferenceKind::Type,
            SymbolReference::Field(_) => ReferenceKind::Field,
            SymbolReference::Method(_) => ReferenceKind::Method,
        }
    }

    /// Name of the module the referenced symbol lives in, `None` for local symbols.
    #[must_use]
    pub fn declaring_module(&self) -> Option<&str> {
        match self {
            SymbolReference::Module(module) => Some(&module.name),
            SymbolReference::Type(type_ref) => type_ref.module.as_deref(),
            SymbolReference::Field(member) | SymbolReference::Method(member) => {
                member.module.as_deref()
            }
        }
    }

    /// The member view of field and method references.
    #[must_use]
    pub fn as_member(&self) -> Option<&MemberReference> {
        match self {
            SymbolReference::Field(member) | SymbolReference::Method(member) => Some(member),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = |f: &mut fmt::Formatter<'_>, module: &Option<String>| match module {
            Some(module) => write!(f, "[{module}]"),
            None => Ok(()),
        };

        match self {
            SymbolReference::Module(module) => write!(f, "[{} {}]", module.name, module.version),
            SymbolReference::Type(type_ref) => {
                scope(f, &type_ref.module)?;
                f.write_str(&type_ref.full_name())
            }
            SymbolReference::Field(member) | SymbolReference::Method(member) => {
                scope(f, &member.module)?;
                f.write_str(&member.key())
            }
        }
    }
}

/// A replacement row for [`Module::replace_reference`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceRow {
    /// Replaces a ModuleRef
    Module(ModuleRef),
    /// Replaces a TypeRef
    Type(TypeRef),
    /// Replaces a MemberRef of the same member kind
    Member(MemberRef),
}

impl Module {
    /// Every external reference in table order: module refs, type refs, member refs.
    ///
    /// The result is a snapshot; enumerating again after an edit reflects the edit.
    #[must_use]
    pub fn enumerate_references(&self) -> Vec<SymbolReference> {
        let tokens = (0..self.module_refs.len())
            .map(|index| Token::from_index(TableId::ModuleRef, index))
            .chain(
                (0..self.type_refs.len()).map(|index| Token::from_index(TableId::TypeRef, index)),
            )
            .chain(
                (0..self.member_refs.len())
                    .map(|index| Token::from_index(TableId::MemberRef, index)),
            );

        tokens
            .filter_map(|token| self.resolve_reference(token))
            .collect()
    }

    /// Resolve the reference row `token` points at.
    #[must_use]
    pub fn resolve_reference(&self, token: Token) -> Option<SymbolReference> {
        match token.table_id()? {
            TableId::ModuleRef => {
                let module_ref = self.module_ref(token)?;
                Some(SymbolReference::Module(ModuleReference {
                    token,
                    name: module_ref.name.clone(),
                    version: module_ref.version,
                }))
            }
            TableId::TypeRef => {
                let type_ref = self.type_ref(token)?;
                let scope = self.module_ref(type_ref.scope);
                Some(SymbolReference::Type(TypeReference {
                    token,
                    module: scope.map(|module_ref| module_ref.name.clone()),
                    module_version: scope.map(|module_ref| module_ref.version),
                    namespace: type_ref.namespace.clone(),
                    name: type_ref.name.clone(),
                }))
            }
            TableId::MemberRef => {
                let member_ref = self.member_ref(token)?;
                let member = MemberReference {
                    token,
                    parent: member_ref.parent,
                    module: self
                        .declaring_module(member_ref.parent)
                        .map(|module_ref| module_ref.name.clone()),
                    declaring_type: self.type_name(member_ref.parent)?,
                    name: member_ref.name.clone(),
                    signature: member_ref.signature.clone(),
                    shape: MemberShape::of(self, &member_ref.signature),
                };
                Some(if member.is_field() {
                    SymbolReference::Field(member)
                } else {
                    SymbolReference::Method(member)
                })
            }
            _ => None,
        }
    }

    /// Replace the row `old` was resolved from.
    ///
    /// Later lookups through the same token see the new row.
    ///
    /// # Errors
    /// Returns [`Error::ReferenceNotFound`] if `old` no longer matches the module (it was
    /// replaced already or never came from this module) or `new` is a row of a different kind,
    /// and [`Error::Malformed`] if `new` holds tokens that do not resolve in this module.
    pub fn replace_reference(&mut self, old: &SymbolReference, new: ReferenceRow) -> Result<()> {
        let token = old.token();
        let not_found = |description: String| Error::ReferenceNotFound { token, description };

        if self.resolve_reference(token).as_ref() != Some(old) {
            return Err(not_found(old.to_string()));
        }

        let Some(index) = token.index() else {
            return Err(not_found(old.to_string()));
        };

        match (old.kind(), new) {
            (ReferenceKind::Module, ReferenceRow::Module(row)) => {
                self.module_refs[index] = row;
            }
            (ReferenceKind::Type, ReferenceRow::Type(row)) => {
                self.check_scope(row.scope)?;
                self.type_refs[index] = row;
            }
            (kind @ (ReferenceKind::Field | ReferenceKind::Method), ReferenceRow::Member(row)) => {
                if row.signature.is_field() != (kind == ReferenceKind::Field) {
                    return Err(not_found(format!(
                        "{old} cannot be replaced by a member of a different kind"
                    )));
                }
                self.check_member_row(&row)?;
                self.member_refs[index] = row;
            }
            (kind, _) => {
                return Err(not_found(format!(
                    "{old} cannot be replaced by a row that is not a {kind} reference"
                )));
            }
        }
        Ok(())
    }

    fn check_scope(&self, scope: Token) -> Result<()> {
        if scope.is_null() || self.module_ref(scope).is_some() {
            Ok(())
        } else {
            Err(malformed_error!("Invalid TypeRef scope {}", scope))
        }
    }

    fn check_member_row(&self, row: &MemberRef) -> Result<()> {
        if self.type_name(row.parent).is_none() {
            return Err(malformed_error!("Invalid MemberRef parent {}", row.parent));
        }
        let types: Vec<&TypeSignature> = match &row.signature {
            MemberSignature::Field(field) => vec![&field.field_type],
            MemberSignature::Method(method) => std::iter::once(&method.return_type)
                .chain(method.params.iter())
                .collect(),
        };
        for signature in types {
            if let Some(token) = signature.type_token() {
                if self.type_name(token).is_none() {
                    return Err(malformed_error!("Signature references invalid type {}", token));
                }
            }
        }
        Ok(())
    }

    /// Token of the ModuleRef `(name, version)`, appending the row if it does not exist.
    pub fn intern_module_ref(&mut self, name: &str, version: Version) -> Token {
        if let Some(index) = self
            .module_refs
            .iter()
            .position(|module_ref| module_ref.name == name && module_ref.version == version)
        {
            return Token::from_index(TableId::ModuleRef, index);
        }

        self.module_refs.push(ModuleRef {
            name: name.to_string(),
            version,
        });
        Token::from_index(TableId::ModuleRef, self.module_refs.len() - 1)
    }

    /// Token of the TypeRef `(scope, namespace, name)`, appending the row if it does not exist.
    pub fn intern_type_ref(&mut self, scope: Token, namespace: &str, name: &str) -> Token {
        if let Some(index) = self.type_refs.iter().position(|type_ref| {
            type_ref.scope == scope && type_ref.namespace == namespace && type_ref.name == name
        }) {
            return Token::from_index(TableId::TypeRef, index);
        }

        self.type_refs.push(TypeRef {
            scope,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        Token::from_index(TableId::TypeRef, self.type_refs.len() - 1)
    }

    /// Token of the MemberRef `(parent, name, signature)`, appending the row if it does not
    /// exist.
    pub fn intern_member_ref(
        &mut self,
        parent: Token,
        name: &str,
        signature: MemberSignature,
    ) -> Token {
        if let Some(index) = self.member_refs.iter().position(|member_ref| {
            member_ref.parent == parent && member_ref.name == name && member_ref.signature == signature
        }) {
            return Token::from_index(TableId::MemberRef, index);
        }

        self.member_refs.push(MemberRef {
            parent,
            name: name.to_string(),
            signature,
        });
        Token::from_index(TableId::MemberRef, self.member_refs.len() - 1)
    }

    /// Remove a ModuleRef row that no TypeRef is scoped to any more.
    ///
    /// Scopes pointing at later rows are renumbered.
    ///
    /// # Errors
    /// Returns [`Error::ReferenceNotFound`] if the row does not exist and
    /// [`Error::StructuralFix`] if a TypeRef still uses it.
    pub fn remove_module_ref(&mut self, token: Token) -> Result<()> {
        let Some(index) = self.module_ref(token).and(token.index()) else {
            return Err(Error::ReferenceNotFound {
                token,
                description: "module reference".to_string(),
            });
        };

        if let Some(user) = self.type_refs.iter().find(|type_ref| type_ref.scope == token) {
            return Err(Error::StructuralFix {
                handler: "module",
                message: format!(
                    "Module reference {} is still the scope of {}",
                    self.module_refs[index].name,
                    user.full_name()
                ),
            });
        }

        self.module_refs.remove(index);
        for type_ref in &mut self.type_refs {
            if type_ref.scope.is_table(TableId::ModuleRef) && type_ref.scope.row() > token.row() {
                type_ref.scope = Token::from_parts(TableId::ModuleRef, type_ref.scope.row() - 1);
            }
        }
        Ok(())
    }

    /// Remove MemberRef rows that no instruction uses any more.
    ///
    /// Instruction operands pointing at later rows are renumbered.
    ///
    /// # Errors
    /// Returns [`Error::ReferenceNotFound`] if a row does not exist and
    /// [`Error::StructuralFix`] if an instruction still uses one.
    pub fn remove_member_refs(&mut self, tokens: &[Token]) -> Result<()> {
        let mut rows = Vec::with_capacity(tokens.len());
        for &token in tokens {
            if self.member_ref(token).is_none() {
                return Err(Error::ReferenceNotFound {
                    token,
                    description: "member reference".to_string(),
                });
            }
            if !self.token_uses(token).is_empty() {
                return Err(Error::StructuralFix {
                    handler: "module",
                    message: format!(
                        "Member reference {} is still used",
                        self.member_refs[token.index().unwrap_or_default()].name
                    ),
                });
            }
            rows.push(token.row());
        }
        rows.sort_unstable();
        rows.dedup();

        for row in rows.iter().rev() {
            self.member_refs.remove(*row as usize - 1);
        }

        let shift = |row: u32| rows.iter().filter(|removed| **removed < row).count() as u32;
        for type_def in &mut self.types {
            for method in &mut type_def.methods {
                let Some(body) = method.body.as_mut() else {
                    continue;
                };
                for instruction in &mut body.instructions {
                    if let Some(token) = instruction.token() {
                        if token.is_table(TableId::MemberRef) && shift(token.row()) > 0 {
                            instruction.operand = crate::code::Operand::Token(Token::from_parts(
                                TableId::MemberRef,
                                token.row() - shift(token.row()),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns `true` if any TypeRef is scoped to the ModuleRef `token`.
    #[must_use]
    pub fn is_module_ref_used(&self, token: Token) -> bool {
        self.type_refs.iter().any(|type_ref| type_ref.scope == token)
    }

    /// Make the type `token` of `source` addressable from this module.
    ///
    /// Types declared by `source` become TypeRefs scoped to `source`; types `source` references
    /// from other modules keep their scope, and types it references from this module resolve
    /// to the local definition.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if `token` does not resolve in `source`, or names a type of
    /// this module that does not exist.
    pub fn import_type(&mut self, source: &Module, token: Token) -> Result<Token> {
        let (namespace, name, scope) = match token.table_id() {
            Some(TableId::TypeDef) => {
                let Some(type_def) = source.type_def_index(token).map(|i| &source.types[i]) else {
                    return Err(malformed_error!("Invalid type {} in {}", token, source.name));
                };
                (&type_def.namespace, &type_def.name, None)
            }
            Some(TableId::TypeRef) => {
                let Some(type_ref) = source.type_ref(token) else {
                    return Err(malformed_error!("Invalid type {} in {}", token, source.name));
                };
                (
                    &type_ref.namespace,
                    &type_ref.name,
                    source.module_ref(type_ref.scope),
                )
            }
            _ => return Err(malformed_error!("{} is not a type token", token)),
        };

        let (module_name, module_version) = match scope {
            Some(module_ref) => (module_ref.name.as_str(), module_ref.version),
            None => (source.name.as_str(), source.version),
        };

        if module_name == self.name {
            let full = full_name(namespace, name);
            return match self.find_type_def(&full) {
                Some(index) => Ok(self.type_def_token(index)),
                None => Err(malformed_error!("Type {} is not defined in {}", full, self.name)),
            };
        }

        let scope = self.intern_module_ref(module_name, module_version);
        Ok(self.intern_type_ref(scope, namespace, name))
    }

    /// [`Module::import_type`] applied to every type token of a signature.
    ///
    /// # Errors
    /// See [`Module::import_type`].
    pub fn import_type_signature(
        &mut self,
        source: &Module,
        signature: &TypeSignature,
    ) -> Result<TypeSignature> {
        Ok(match signature {
            TypeSignature::Class(token) => TypeSignature::Class(self.import_type(source, *token)?),
            TypeSignature::ValueType(token) => {
                TypeSignature::ValueType(self.import_type(source, *token)?)
            }
            TypeSignature::SzArray(element) => {
                TypeSignature::SzArray(Box::new(self.import_type_signature(source, element)?))
            }
            other => other.clone(),
        })
    }

    /// [`Module::import_type`] applied to a method signature.
    ///
    /// # Errors
    /// See [`Module::import_type`].
    pub fn import_method_signature(
        &mut self,
        source: &Module,
        signature: &MethodSignature,
    ) -> Result<MethodSignature> {
        let return_type = self.import_type_signature(source, &signature.return_type)?;
        let params = signature
            .params
            .iter()
            .map(|param| self.import_type_signature(source, param))
            .collect::<Result<Vec<_>>>()?;

        Ok(MethodSignature {
            has_this: signature.has_this,
            return_type,
            params,
        })
    }

    /// Every instruction using `token` as `(type index, method index, instruction index)`.
    #[must_use]
    pub fn token_uses(&self, token: Token) -> Vec<(usize, usize, usize)> {
        let mut uses = Vec::new();
        for (type_index, method_index, method) in self.methods() {
            if let Some(body) = &method.body {
                for instruction_index in body.uses_of(token) {
                    uses.push((type_index, method_index, instruction_index));
                }
            }
        }
        uses
    }
}
