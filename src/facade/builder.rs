use std::{collections::HashSet, sync::Arc};

use log::debug;

use crate::{
    facade::{parse_member_key, FacadeRegistry, FacadeTarget, TypeFacade},
    module::{MemberShape, Module},
    Error, Result,
};

struct MemberMapping {
    old: String,
    owner: String,
    name: String,
    field: bool,
}

/// Collects facade registrations; [`FacadeRegistryBuilder::build`] freezes them.
///
/// Targets are resolved against the modules passed to [`FacadeRegistryBuilder::module`], in the
/// order the modules were added.
#[derive(Default)]
pub struct FacadeRegistryBuilder {
    modules: Vec<Arc<Module>>,
    sources: Vec<String>,
    members: Vec<MemberMapping>,
    types: Vec<(String, String)>,
}

impl FacadeRegistryBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the types of `module` available as mapping targets.
    #[must_use]
    pub fn module(mut self, module: Arc<Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Also apply the registrations to references into `module_name`, typically a host release
    /// that is no longer loaded.
    #[must_use]
    pub fn source(mut self, module_name: &str) -> Self {
        self.sources.push(module_name.to_string());
        self
    }

    /// Map the field `old` (`Ns.Type::Name`) to field `new_name` of `new_owner`.
    #[must_use]
    pub fn map_field(mut self, old: &str, new_owner: &str, new_name: &str) -> Self {
        self.members.push(MemberMapping {
            old: old.to_string(),
            owner: new_owner.to_string(),
            name: new_name.to_string(),
            field: true,
        });
        self
    }

    /// Map the method `old` (`Ns.Type::Name(T1,T2)`) to the method `new_name` of `new_owner`
    /// taking the same parameters.
    #[must_use]
    pub fn map_method(mut self, old: &str, new_owner: &str, new_name: &str) -> Self {
        self.members.push(MemberMapping {
            old: old.to_string(),
            owner: new_owner.to_string(),
            name: new_name.to_string(),
            field: false,
        });
        self
    }

    /// Serve members of `old_type` from `facade_type` wherever the facade declares them with
    /// the same name and shape.
    #[must_use]
    pub fn map_facade(mut self, old_type: &str, facade_type: &str) -> Self {
        self.types
            .push((old_type.to_string(), facade_type.to_string()));
        self
    }

    /// Resolve every registration and freeze the registry.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if a signature or type is registered twice, a key is
    /// malformed, or a target type or member does not exist in the registered modules.
    pub fn build(self) -> Result<FacadeRegistry> {
        let mut seen = HashSet::new();
        let mut members = Vec::with_capacity(self.members.len());
        for mapping in &self.members {
            if !seen.insert(mapping.old.as_str()) {
                return Err(Error::Configuration(format!(
                    "Facade mapping for '{}' is registered twice",
                    mapping.old
                )));
            }
            let target = self.resolve_member(mapping)?;
            debug!("Facade {} -> {}", mapping.old, target);
            members.push((mapping.old.clone(), target));
        }

        let mut seen = HashSet::new();
        let mut types = Vec::with_capacity(self.types.len());
        for (old_type, facade_type) in &self.types {
            if !seen.insert(old_type.as_str()) {
                return Err(Error::Configuration(format!(
                    "Type facade for '{old_type}' is registered twice"
                )));
            }
            let (module, index) = self.resolve_type(facade_type)?;
            let facade = TypeFacade::new(old_type, module, index);
            debug!(
                "Type facade {} -> [{}]{} ({} members)",
                old_type,
                facade.module,
                facade.full_name(),
                facade.members.len()
            );
            types.push(facade);
        }

        let mut sources: Vec<String> = self
            .modules
            .iter()
            .map(|module| module.name.clone())
            .chain(self.sources.iter().cloned())
            .collect();
        sources.sort();
        sources.dedup();

        Ok(FacadeRegistry {
            sources,
            members,
            types,
        })
    }

    fn resolve_type(&self, full_name: &str) -> Result<(&Module, usize)> {
        self.modules
            .iter()
            .find_map(|module| {
                module
                    .find_type_def(full_name)
                    .map(|index| (module.as_ref(), index))
            })
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "Facade target type '{full_name}' is not defined in any registered module"
                ))
            })
    }

    fn resolve_member(&self, mapping: &MemberMapping) -> Result<FacadeTarget> {
        let (_, _, old_params) = parse_member_key(&mapping.old)?;
        let (module, index) = self.resolve_type(&mapping.owner)?;
        let type_def = &module.types[index];

        let shape = match (mapping.field, old_params) {
            (true, None) => type_def
                .fields
                .iter()
                .find(|field| field.name == mapping.name)
                .map(|field| MemberShape::of_field(module, &field.signature)),
            (false, Some(params)) => type_def
                .methods
                .iter()
                .filter(|method| method.name == mapping.name)
                .map(|method| MemberShape::of_method(module, &method.signature))
                .find(|shape| shape.params().iter().map(String::as_str).eq(params.iter().copied())),
            (true, Some(_)) => {
                return Err(Error::Configuration(format!(
                    "Field mapping '{}' must not have a parameter list",
                    mapping.old
                )))
            }
            (false, None) => {
                return Err(Error::Configuration(format!(
                    "Method mapping '{}' needs a parameter list",
                    mapping.old
                )))
            }
        };

        let Some(shape) = shape else {
            return Err(Error::Configuration(format!(
                "'{}' has no {} '{}' matching '{}'",
                mapping.owner,
                if mapping.field { "field" } else { "method" },
                mapping.name,
                mapping.old
            )));
        };

        Ok(FacadeTarget {
            module: module.name.clone(),
            version: module.version,
            namespace: type_def.namespace.clone(),
            type_name: type_def.name.clone(),
            member: mapping.name.clone(),
            shape,
        })
    }
}
