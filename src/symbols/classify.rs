use crate::{
    module::{MemberReference, MemberShape, SymbolReference},
    symbols::{MethodLocation, SymbolUniverse},
};

/// The outcome of checking one reference against the trusted universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The reference points outside the trusted modules and is not checked
    Unchecked,
    /// The symbol exists with the expected shape
    Resolved,
    /// No symbol of that name exists
    Missing(String),
    /// A symbol of that name exists, but with a different shape
    Mismatch(String),
}

impl SymbolUniverse {
    /// Check `reference` against the trusted modules.
    ///
    /// Types are looked up by full name in the declaring module; members by name along the
    /// base-type chain of their declaring type. A method matches when one candidate has the
    /// same instance-ness, return type and parameter types.
    #[must_use]
    pub fn classify(&self, reference: &SymbolReference) -> Classification {
        let Some(module_name) = reference.declaring_module() else {
            return Classification::Unchecked;
        };
        if !self.is_trusted(module_name) {
            return Classification::Unchecked;
        }
        let Some(module) = self.module(module_name) else {
            return Classification::Missing(format!("trusted module {module_name} is not loaded"));
        };

        match reference {
            SymbolReference::Module(module_ref) => {
                if module.version.satisfies(&module_ref.version) {
                    Classification::Resolved
                } else {
                    Classification::Mismatch(format!(
                        "requires {} {}, found {}",
                        module_ref.name, module_ref.version, module.version
                    ))
                }
            }
            SymbolReference::Type(type_ref) => {
                if self.resolve_type(module_name, &type_ref.full_name()).is_some() {
                    Classification::Resolved
                } else {
                    Classification::Missing(format!(
                        "type {} does not exist in {}",
                        type_ref.full_name(),
                        module_name
                    ))
                }
            }
            SymbolReference::Field(member) => self.classify_field(member, module_name),
            SymbolReference::Method(member) => self.classify_method(member, module_name),
        }
    }

    fn classify_field(&self, member: &MemberReference, module_name: &str) -> Classification {
        let Some(owner) = self.member_owner(member) else {
            return missing_owner(member, module_name);
        };
        let Some(field) = self.find_field(owner, &member.name) else {
            return Classification::Missing(format!(
                "field {} does not exist in {}",
                member.key(),
                module_name
            ));
        };

        let expected = field.shape();
        if expected == member.shape {
            return Classification::Resolved;
        }
        match (&member.shape, &expected) {
            (
                MemberShape::Field { field_type: actual },
                MemberShape::Field {
                    field_type: declared,
                },
            ) => Classification::Mismatch(format!(
                "field type: reference expects {actual}, {}::{} is {declared}",
                field.owner.full_name(),
                member.name
            )),
            _ => Classification::Mismatch(format!("{} is not a field", member.key())),
        }
    }

    fn classify_method(&self, member: &MemberReference, module_name: &str) -> Classification {
        let Some(owner) = self.member_owner(member) else {
            return missing_owner(member, module_name);
        };
        let candidates = self.find_methods(owner, &member.name);
        if candidates.is_empty() {
            return Classification::Missing(format!(
                "method {} does not exist in {}",
                member.key(),
                module_name
            ));
        }
        if candidates
            .iter()
            .any(|candidate| candidate.shape() == member.shape)
        {
            return Classification::Resolved;
        }

        Classification::Mismatch(describe_mismatch(member, &candidates))
    }
}

fn missing_owner(member: &MemberReference, module_name: &str) -> Classification {
    Classification::Missing(format!(
        "declaring type {} of {} does not exist in {}",
        member.declaring_type, member.name, module_name
    ))
}

/// Explain why no candidate matches, preferring a candidate of the same arity.
fn describe_mismatch(member: &MemberReference, candidates: &[MethodLocation<'_>]) -> String {
    let wanted = member.shape.params();
    let candidate = candidates
        .iter()
        .find(|candidate| candidate.shape().params().len() == wanted.len())
        .unwrap_or(&candidates[0]);
    let key = candidate.key();

    let (
        MemberShape::Method {
            has_this,
            return_type,
            params,
        },
        MemberShape::Method {
            has_this: declared_this,
            return_type: declared_return,
            params: declared_params,
        },
    ) = (&member.shape, candidate.shape())
    else {
        return format!("{} is not a method", member.key());
    };

    if params.len() != declared_params.len() {
        return format!(
            "arity: reference passes {} parameter(s), {} expects {}",
            params.len(),
            key,
            declared_params.len()
        );
    }
    if let Some((position, (actual, declared))) = params
        .iter()
        .zip(declared_params.iter())
        .enumerate()
        .find(|(_, (actual, declared))| actual != declared)
    {
        return format!(
            "parameter {}: reference passes {}, {} expects {}",
            position + 1,
            actual,
            key,
            declared
        );
    }
    if *has_this != declared_this {
        let (expected, found) = if *has_this {
            ("an instance", "static")
        } else {
            ("a static", "an instance method")
        };
        return format!("reference expects {expected} method, {key} is {found}");
    }
    format!("return type: reference expects {return_type}, {key} returns {declared_return}")
}
