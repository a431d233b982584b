//! The standard handlers, one per file, in dispatch order.

mod architecture;
mod classifier;
mod facade;
mod field_property;
mod optional_params;
mod platform;
mod type_finder;

pub use architecture::{ArchitectureCallback, ArchitectureHandler};
pub use classifier::ReferenceClassifier;
pub use facade::FacadeHandler;
pub use field_property::FieldPropertyHandler;
pub use optional_params::OptionalParamsHandler;
pub use platform::PlatformHandler;
pub use type_finder::TypeFinder;

use crate::module::{Module, TableId, Token, Version};

/// A ModuleRef for `name` that `version` satisfies, added if the module has none.
pub(crate) fn scope_for(module: &mut Module, name: &str, version: Version) -> Token {
    let existing = module
        .module_refs
        .iter()
        .enumerate()
        .filter(|(_, module_ref)| module_ref.name == name && version.satisfies(&module_ref.version))
        .max_by_key(|(_, module_ref)| module_ref.version)
        .map(|(index, _)| index);

    match existing {
        Some(index) => Token::from_index(TableId::ModuleRef, index),
        None => module.intern_module_ref(name, version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{build_plugin, HOST_V1, HOST_V2};

    #[test]
    fn scopes_are_reused_when_satisfied() {
        let mut plugin = build_plugin();
        let count = plugin.module_refs.len();

        let v1 = scope_for(&mut plugin, "Host", HOST_V1);
        assert_eq!(plugin.module_refs.len(), count);
        // A 2.0 module also serves the 1.0 reference.
        assert_eq!(scope_for(&mut plugin, "Host", HOST_V2), v1);

        let compat = scope_for(&mut plugin, "Compat", HOST_V1);
        assert_eq!(plugin.module_refs.len(), count + 1);
        assert_eq!(plugin.module_ref(compat).unwrap().name, "Compat");
    }
}
