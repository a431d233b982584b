//! Rows of the module tables.
//!
//! Definitions own their children: a [`TypeDef`] holds its fields and methods, a [`MethodDef`]
//! its parameters and body. The flat, run-based table layout of the file format only exists in
//! the reader and writer.

use crate::{
    code::MethodBody,
    module::{
        Constant, FieldAttributes, FieldSignature, MemberSignature, MethodAttributes,
        MethodSignature, Token, TypeAttributes, Version,
    },
};

/// Join a namespace and a type name into a full type name.
#[must_use]
pub fn full_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// Split a full type name into namespace and name at the last dot.
#[must_use]
pub fn split_full_name(full_name: &str) -> (&str, &str) {
    match full_name.rfind('.') {
        Some(dot) => (&full_name[..dot], &full_name[dot + 1..]),
        None => ("", full_name),
    }
}

/// A reference to another module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    /// Short name of the referenced module
    pub name: String,
    /// The minimum version the referencing module was built against
    pub version: Version,
}

/// A reference to a type declared elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// Null for a type in this module, otherwise a ModuleRef token
    pub scope: Token,
    /// Namespace of the type
    pub namespace: String,
    /// Name of the type
    pub name: String,
}

impl TypeRef {
    /// `Namespace.Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.name)
    }
}

/// A reference to a field or method of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// The TypeRef or TypeDef token of the declaring type
    pub parent: Token,
    /// Name of the member
    pub name: String,
    /// Field or method signature, with tokens local to the referencing module
    pub signature: MemberSignature,
}

/// A type defined in the module.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeDef {
    /// Type attributes
    pub flags: TypeAttributes,
    /// Namespace of the type
    pub namespace: String,
    /// Name of the type
    pub name: String,
    /// Base type token, null for none
    pub extends: Token,
    /// Declared fields
    pub fields: Vec<FieldDef>,
    /// Declared methods
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// `Namespace.Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.name)
    }

    /// Index of the field called `name`.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Indices of all methods called `name`.
    #[must_use]
    pub fn method_indices(&self, name: &str) -> Vec<usize> {
        self.methods
            .iter()
            .enumerate()
            .filter(|(_, method)| method.name == name)
            .map(|(index, _)| index)
            .collect()
    }
}

/// A field defined in the module.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field attributes
    pub flags: FieldAttributes,
    /// Name of the field
    pub name: String,
    /// The field type
    pub signature: FieldSignature,
}

impl FieldDef {
    /// Returns `true` for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldAttributes::STATIC)
    }
}

/// A method defined in the module.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method attributes
    pub flags: MethodAttributes,
    /// Name of the method
    pub name: String,
    /// The method signature
    pub signature: MethodSignature,
    /// Parameter rows (names and default values)
    pub params: Vec<ParamDef>,
    /// The code, `None` for abstract methods
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// The default value of parameter `index` (zero-based), if it declares one.
    #[must_use]
    pub fn default_value(&self, index: usize) -> Option<&Constant> {
        let sequence = u16::try_from(index + 1).ok()?;
        self.params
            .iter()
            .find(|param| param.sequence == sequence)
            .and_then(|param| param.default.as_ref())
    }
}

/// A parameter row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    /// 1-based position of the parameter, 0 for the return value
    pub sequence: u16,
    /// Name of the parameter
    pub name: String,
    /// Default value of an optional parameter
    pub default: Option<Constant>,
}

impl ParamDef {
    /// A required parameter.
    #[must_use]
    pub fn new(sequence: u16, name: &str) -> Self {
        ParamDef {
            sequence,
            name: name.to_string(),
            default: None,
        }
    }

    /// An optional parameter with a default value.
    #[must_use]
    pub fn optional(sequence: u16, name: &str, default: Constant) -> Self {
        ParamDef {
            sequence,
            name: name.to_string(),
            default: Some(default),
        }
    }
}
