use std::{
    collections::{HashMap, HashSet},
    ptr,
    sync::Arc,
};

use crate::{
    module::{
        FieldDef, MemberReference, MemberShape, MethodDef, Module, TableId, Token, TypeDef,
    },
    Error, Result,
};

/// Longest base-type chain followed before giving up.
const MAX_BASE_DEPTH: usize = 64;

/// A type definition inside one of the universe's modules.
#[derive(Debug, Clone, Copy)]
pub struct TypeLocation<'a> {
    /// The module defining the type
    pub module: &'a Module,
    /// Index into the module's types
    pub index: usize,
}

impl<'a> TypeLocation<'a> {
    /// The definition.
    #[must_use]
    pub fn type_def(&self) -> &'a TypeDef {
        &self.module.types[self.index]
    }

    /// `Namespace.Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        self.type_def().full_name()
    }

    /// The TypeDef token within the defining module.
    #[must_use]
    pub fn token(&self) -> Token {
        self.module.type_def_token(self.index)
    }
}

impl PartialEq for TypeLocation<'_> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.module, other.module) && self.index == other.index
    }
}

/// A field definition found in the universe.
#[derive(Debug, Clone, Copy)]
pub struct FieldLocation<'a> {
    /// The type declaring the field (possibly a base of the type searched)
    pub owner: TypeLocation<'a>,
    /// Index into the owner's fields
    pub index: usize,
}

impl<'a> FieldLocation<'a> {
    /// The definition.
    #[must_use]
    pub fn field(&self) -> &'a FieldDef {
        &self.owner.type_def().fields[self.index]
    }

    /// The field shape, rendered in the defining module.
    #[must_use]
    pub fn shape(&self) -> MemberShape {
        MemberShape::of_field(self.owner.module, &self.field().signature)
    }
}

/// A method definition found in the universe.
#[derive(Debug, Clone, Copy)]
pub struct MethodLocation<'a> {
    /// The type declaring the method (possibly a base of the type searched)
    pub owner: TypeLocation<'a>,
    /// Index into the owner's methods
    pub index: usize,
}

impl<'a> MethodLocation<'a> {
    /// The definition.
    #[must_use]
    pub fn method(&self) -> &'a MethodDef {
        &self.owner.type_def().methods[self.index]
    }

    /// The method shape, rendered in the defining module.
    #[must_use]
    pub fn shape(&self) -> MemberShape {
        MemberShape::of_method(self.owner.module, &self.method().signature)
    }

    /// `Ns.Type::Name(T1,T2)`
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}::{}({})",
            self.owner.full_name(),
            self.method().name,
            self.shape().params().join(",")
        )
    }
}

/// The known-good modules of the current host.
///
/// Only references into modules named in the allow-list are ever checked; a trusted name
/// whose module was not loaded makes every reference into it unresolvable.
#[derive(Debug, Default)]
pub struct SymbolUniverse {
    trusted: HashSet<String>,
    modules: HashMap<String, Arc<Module>>,
}

impl SymbolUniverse {
    /// An empty universe trusting `trusted_names`.
    pub fn new<I, S>(trusted_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SymbolUniverse {
            trusted: trusted_names.into_iter().map(Into::into).collect(),
            modules: HashMap::new(),
        }
    }

    /// Add a loaded module.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if a module with the same name was added before.
    pub fn add_module(&mut self, module: Arc<Module>) -> Result<()> {
        if self.modules.contains_key(&module.name) {
            return Err(Error::Configuration(format!(
                "Module '{}' was added to the symbol universe twice",
                module.name
            )));
        }
        self.modules.insert(module.name.clone(), module);
        Ok(())
    }

    /// Builder-style [`SymbolUniverse::add_module`].
    ///
    /// # Errors
    /// See [`SymbolUniverse::add_module`].
    pub fn with_module(mut self, module: Module) -> Result<Self> {
        self.add_module(Arc::new(module))?;
        Ok(self)
    }

    /// Returns `true` if references into `module_name` are checked.
    #[must_use]
    pub fn is_trusted(&self, module_name: &str) -> bool {
        self.trusted.contains(module_name)
    }

    /// The trusted module names, sorted.
    #[must_use]
    pub fn trusted_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.trusted.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The loaded module called `name`.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name).map(Arc::as_ref)
    }

    /// Number of loaded modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if no module is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// The definition of `full_name` in module `module_name`.
    #[must_use]
    pub fn resolve_type(&self, module_name: &str, full_name: &str) -> Option<TypeLocation<'_>> {
        let module = self.module(module_name)?;
        let index = module.find_type_def(full_name)?;
        Some(TypeLocation { module, index })
    }

    /// The type declaring a member reference, if its module is loaded.
    #[must_use]
    pub fn member_owner(&self, reference: &MemberReference) -> Option<TypeLocation<'_>> {
        self.resolve_type(reference.module.as_deref()?, &reference.declaring_type)
    }

    /// `start` followed by its base types, as far as they are defined in loaded modules.
    #[must_use]
    pub fn base_chain<'a>(&'a self, start: TypeLocation<'a>) -> Vec<TypeLocation<'a>> {
        let mut chain = vec![start];
        let mut current = start;

        while chain.len() < MAX_BASE_DEPTH {
            let Some(next) = self.base_of(current) else {
                break;
            };
            if chain.contains(&next) {
                break;
            }
            chain.push(next);
            current = next;
        }
        chain
    }

    fn base_of<'a>(&'a self, location: TypeLocation<'a>) -> Option<TypeLocation<'a>> {
        let module = location.module;
        let extends = location.type_def().extends;

        match extends.table_id()? {
            TableId::TypeDef => Some(TypeLocation {
                module,
                index: module.type_def_index(extends)?,
            }),
            TableId::TypeRef => {
                let type_ref = module.type_ref(extends)?;
                match module.module_ref(type_ref.scope) {
                    Some(scope) => self.resolve_type(&scope.name, &type_ref.full_name()),
                    None => Some(TypeLocation {
                        module,
                        index: module.find_type_def(&type_ref.full_name())?,
                    }),
                }
            }
            _ => None,
        }
    }

    /// The field `name` of `owner` or the nearest base type declaring it.
    #[must_use]
    pub fn find_field<'a>(&'a self, owner: TypeLocation<'a>, name: &str) -> Option<FieldLocation<'a>> {
        self.base_chain(owner).into_iter().find_map(|location| {
            location
                .type_def()
                .field_index(name)
                .map(|index| FieldLocation {
                    owner: location,
                    index,
                })
        })
    }

    /// All methods called `name` on `owner` and its base types, most derived first.
    #[must_use]
    pub fn find_methods<'a>(&'a self, owner: TypeLocation<'a>, name: &str) -> Vec<MethodLocation<'a>> {
        self.base_chain(owner)
            .into_iter()
            .flat_map(|location| {
                location
                    .type_def()
                    .method_indices(name)
                    .into_iter()
                    .map(move |index| MethodLocation {
                        owner: location,
                        index,
                    })
            })
            .collect()
    }
}
