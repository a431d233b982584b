//! Fluent in-memory construction of modules.
//!
//! [`ModuleBuilder`] hands out tokens as rows are added, so method bodies can refer to the
//! references and definitions created before them. Types are built one at a time through a
//! [`TypeDefBuilder`]; once the next type is started the previous one is closed, which keeps
//! every token handed out stable.
//!
//! # Examples
//!
//! ```rust
//! use modcompat::code::{Instruction, Opcode};
//! use modcompat::module::{MethodSignature, ModuleBuilder, TypeSignature, Version};
//!
//! let mut builder = ModuleBuilder::new("Greeter", Version::new(1, 0, 0, 0));
//! let hello = builder.user_string("hello")?;
//! builder.type_def("Greeter", "Main").method(
//!     "Greeting",
//!     MethodSignature::static_method(TypeSignature::String, vec![]),
//!     vec![
//!         Instruction::with_token(Opcode::Ldstr, hello),
//!         Instruction::simple(Opcode::Ret),
//!     ],
//! );
//! let module = builder.build()?;
//! assert_eq!(module.types[0].methods[0].body.as_ref().unwrap().max_stack, 1);
//! # Ok::<(), modcompat::Error>(())
//! ```

use crate::{
    code::{Instruction, MethodBody, Opcode, Operand},
    module::{
        FieldAttributes, FieldDef, FieldSignature, MemberSignature, MethodAttributes, MethodDef,
        MethodSignature, Module, ModuleFlags, Token, TypeAttributes, TypeDef,
        TypeSignature, Version,
    },
    Result,
};

/// Builder for a [`Module`].
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Start an empty IL-only module.
    #[must_use]
    pub fn new(name: &str, version: Version) -> Self {
        ModuleBuilder {
            module: Module::new(name, version),
        }
    }

    /// Set the module flags.
    pub fn flags(&mut self, flags: ModuleFlags) -> &mut Self {
        self.module.flags = flags;
        self
    }

    /// Reference another module.
    pub fn module_ref(&mut self, name: &str, version: Version) -> Token {
        self.module.intern_module_ref(name, version)
    }

    /// Reference a type of another module; a null `scope` references a type of this module.
    pub fn type_ref(&mut self, scope: Token, namespace: &str, name: &str) -> Token {
        self.module.intern_type_ref(scope, namespace, name)
    }

    /// Reference a field.
    pub fn field_ref(&mut self, parent: Token, name: &str, field_type: TypeSignature) -> Token {
        self.module.intern_member_ref(
            parent,
            name,
            MemberSignature::Field(FieldSignature::new(field_type)),
        )
    }

    /// Reference a method.
    pub fn method_ref(&mut self, parent: Token, name: &str, signature: MethodSignature) -> Token {
        self.module
            .intern_member_ref(parent, name, MemberSignature::Method(signature))
    }

    /// Add a user string, returning its `ldstr` token.
    ///
    /// # Errors
    /// Returns an error if the heap is full.
    pub fn user_string(&mut self, value: &str) -> Result<Token> {
        self.module.user_strings.intern(value)
    }

    /// Start a public type definition.
    pub fn type_def(&mut self, namespace: &str, name: &str) -> TypeDefBuilder<'_> {
        self.module.types.push(TypeDef {
            flags: TypeAttributes::PUBLIC,
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..TypeDef::default()
        });
        let index = self.module.types.len() - 1;
        TypeDefBuilder {
            module: &mut self.module,
            index,
        }
    }

    /// Validate all tokens, verify all bodies and return the module.
    ///
    /// Each body's `max_stack` is raised to the depth verification computes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for dangling tokens or invalid bodies.
    pub fn build(mut self) -> Result<Module> {
        self.module.validate()?;
        self.module.verify_bodies()?;
        Ok(self.module)
    }
}

/// Builder for the members of one type, see [`ModuleBuilder::type_def`].
pub struct TypeDefBuilder<'a> {
    module: &'a mut Module,
    index: usize,
}

impl TypeDefBuilder<'_> {
    /// Token of the type being built.
    #[must_use]
    pub fn token(&self) -> Token {
        self.module.type_def_token(self.index)
    }

    /// Set the base type.
    pub fn extends(&mut self, base: Token) -> &mut Self {
        self.module.types[self.index].extends = base;
        self
    }

    /// Set the type attributes.
    pub fn flags(&mut self, flags: TypeAttributes) -> &mut Self {
        self.module.types[self.index].flags = flags;
        self
    }

    /// Add a public instance field.
    pub fn field(&mut self, name: &str, field_type: TypeSignature) -> Token {
        self.field_with(FieldAttributes::PUBLIC, name, field_type)
    }

    /// Add a public static field.
    pub fn static_field(&mut self, name: &str, field_type: TypeSignature) -> Token {
        self.field_with(FieldAttributes::PUBLIC | FieldAttributes::STATIC, name, field_type)
    }

    /// Add a field with explicit attributes.
    pub fn field_with(
        &mut self,
        flags: FieldAttributes,
        name: &str,
        field_type: TypeSignature,
    ) -> Token {
        let fields = &mut self.module.types[self.index].fields;
        fields.push(FieldDef {
            flags,
            name: name.to_string(),
            signature: FieldSignature::new(field_type),
        });
        let field_index = fields.len() - 1;
        self.module.field_token(self.index, field_index)
    }

    /// Add a public method with a body; static unless the signature has `this`.
    pub fn method(
        &mut self,
        name: &str,
        signature: MethodSignature,
        instructions: Vec<Instruction>,
    ) -> Token {
        let mut flags = MethodAttributes::PUBLIC;
        if !signature.has_this {
            flags |= MethodAttributes::STATIC;
        }
        let local_count = local_count(&instructions);

        self.method_def(MethodDef {
            flags,
            name: name.to_string(),
            signature,
            params: Vec::new(),
            body: Some(MethodBody::new(0, local_count, instructions)),
        })
    }

    /// Add a public abstract virtual method.
    pub fn abstract_method(&mut self, name: &str, signature: MethodSignature) -> Token {
        self.method_def(MethodDef {
            flags: MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL | MethodAttributes::ABSTRACT,
            name: name.to_string(),
            signature,
            params: Vec::new(),
            body: None,
        })
    }

    /// Add a fully specified method.
    pub fn method_def(&mut self, method: MethodDef) -> Token {
        let methods = &mut self.module.types[self.index].methods;
        methods.push(method);
        let method_index = methods.len() - 1;
        self.module.method_token(self.index, method_index)
    }
}

/// Number of locals addressed by the local load/store instructions.
fn local_count(instructions: &[Instruction]) -> u16 {
    instructions
        .iter()
        .filter_map(|instruction| match (instruction.opcode, &instruction.operand) {
            (Opcode::Ldloc0 | Opcode::Stloc0, _) => Some(1),
            (Opcode::Ldloc1 | Opcode::Stloc1, _) => Some(2),
            (Opcode::Ldloc2 | Opcode::Stloc2, _) => Some(3),
            (Opcode::Ldloc3 | Opcode::Stloc3, _) => Some(4),
            (Opcode::LdlocS | Opcode::StlocS, Operand::UInt8(index)) => Some(u16::from(*index) + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}
