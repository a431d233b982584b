use crate::module::{full_name, MemberReference, MemberShape, Module, Version};

/// Where a mapped member lives now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacadeTarget {
    /// Module declaring the target type
    pub module: String,
    /// Version of that module
    pub version: Version,
    /// Namespace of the target type
    pub namespace: String,
    /// Name of the target type
    pub type_name: String,
    /// Name of the target member
    pub member: String,
    /// Shape of the target member
    pub shape: MemberShape,
}

impl FacadeTarget {
    /// Full name of the target type.
    #[must_use]
    pub fn type_full_name(&self) -> String {
        full_name(&self.namespace, &self.type_name)
    }
}

impl std::fmt::Display for FacadeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]{}::{}", self.module, self.type_full_name(), self.member)
    }
}

/// A whole-type facade: members of `old_type` are served by the facade type when it declares
/// them with the same shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeFacade {
    /// Full name of the replaced type
    pub old_type: String,
    /// Module declaring the facade type
    pub module: String,
    /// Version of that module
    pub version: Version,
    /// Namespace of the facade type
    pub namespace: String,
    /// Name of the facade type
    pub type_name: String,
    /// Members the facade declares
    pub members: Vec<(String, MemberShape)>,
}

impl TypeFacade {
    pub(crate) fn new(old_type: &str, module: &Module, index: usize) -> Self {
        let type_def = &module.types[index];
        let fields = type_def.fields.iter().map(|field| {
            (
                field.name.clone(),
                MemberShape::of_field(module, &field.signature),
            )
        });
        let methods = type_def.methods.iter().map(|method| {
            (
                method.name.clone(),
                MemberShape::of_method(module, &method.signature),
            )
        });

        TypeFacade {
            old_type: old_type.to_string(),
            module: module.name.clone(),
            version: module.version,
            namespace: type_def.namespace.clone(),
            type_name: type_def.name.clone(),
            members: fields.chain(methods).collect(),
        }
    }

    /// Full name of the facade type.
    #[must_use]
    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.type_name)
    }

    /// Returns `true` if the facade declares `name` with exactly `shape`.
    #[must_use]
    pub fn provides(&self, name: &str, shape: &MemberShape) -> bool {
        self.members
            .iter()
            .any(|(member, member_shape)| member == name && member_shape == shape)
    }

    /// The target serving `name` with `shape`, if the facade declares it.
    #[must_use]
    pub fn target_for(&self, name: &str, shape: &MemberShape) -> Option<FacadeTarget> {
        self.provides(name, shape).then(|| FacadeTarget {
            module: self.module.clone(),
            version: self.version,
            namespace: self.namespace.clone(),
            type_name: self.type_name.clone(),
            member: name.to_string(),
            shape: shape.clone(),
        })
    }
}

/// The frozen facade registry, see [`super::FacadeRegistryBuilder`].
///
/// Registrations only apply to references declared by one of the source modules: the registered
/// modules plus any added with [`super::FacadeRegistryBuilder::source`]. A same-named type of any
/// other module is left alone.
#[derive(Debug, Clone, Default)]
pub struct FacadeRegistry {
    pub(crate) sources: Vec<String>,
    pub(crate) members: Vec<(String, FacadeTarget)>,
    pub(crate) types: Vec<TypeFacade>,
}

impl FacadeRegistry {
    /// Start collecting registrations.
    #[must_use]
    pub fn builder() -> super::FacadeRegistryBuilder {
        super::FacadeRegistryBuilder::new()
    }

    /// Returns `true` if references into `module` are subject to the registrations. Local
    /// references (`None`) never are.
    #[must_use]
    pub fn covers(&self, module: Option<&str>) -> bool {
        module.is_some_and(|name| self.sources.iter().any(|source| source == name))
    }

    /// Where `member` went: an exact mapping of its key first, then a facade of its type.
    #[must_use]
    pub fn lookup(&self, member: &MemberReference) -> Option<FacadeTarget> {
        if !self.covers(member.module.as_deref()) {
            return None;
        }

        let key = member.key();
        if let Some((_, target)) = self.members.iter().find(|(old, _)| *old == key) {
            return Some(target.clone());
        }

        self.type_facade(&member.declaring_type)?
            .target_for(&member.name, &member.shape)
    }

    /// Returns `true` if `key` has a mapping of its own.
    #[must_use]
    pub fn maps_exactly(&self, key: &str) -> bool {
        self.members.iter().any(|(old, _)| old == key)
    }

    /// The whole-type facade registered for `old_type`.
    #[must_use]
    pub fn type_facade(&self, old_type: &str) -> Option<&TypeFacade> {
        self.types.iter().find(|facade| facade.old_type == old_type)
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len() + self.types.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
