//! Facade and signature mapping.
//!
//! Host releases rename, move and retire members. A [`FacadeRegistry`] records where the old
//! symbols went: either an exact member mapping (`Game.World::Log(System.String)` now lives at
//! `Game.World::Broadcast`) or a whole-type facade (`Game.Legacy` is served by
//! `Compat.LegacyFacade` for every member the facade declares with the same shape).
//!
//! Registrations are collected by a [`FacadeRegistryBuilder`] and frozen by
//! [`FacadeRegistryBuilder::build`], which resolves every target against the registered facade
//! modules and rejects duplicate registrations. The frozen registry is read-only and shared
//! between all pipelines of a session.
//!
//! Mappings never change the caller-visible shape: a member is only mapped to a target with the
//! same parameter types in the same order, so call sites stay valid without touching the
//! instruction stream.
//!
//! # Examples
//!
//! ```rust,no_run
//! use modcompat::facade::FacadeRegistry;
//! use modcompat::Module;
//! use std::{path::Path, sync::Arc};
//!
//! let host = Arc::new(Module::from_file(Path::new("Host.pmod"))?);
//! let registry = FacadeRegistry::builder()
//!     .module(host)
//!     .map_method("Game.World::Log(System.String)", "Game.World", "Broadcast")
//!     .build()?;
//! assert_eq!(registry.len(), 1);
//! # Ok::<(), modcompat::Error>(())
//! ```

mod builder;
mod registry;

pub use builder::FacadeRegistryBuilder;
pub use registry::{FacadeRegistry, FacadeTarget, TypeFacade};

use crate::{Error, Result};

/// Split a member key `Ns.Type::Name(T1,T2)` into type, member name and parameter list.
///
/// Field keys (`Ns.Type::Name`) have no parameter list.
pub(crate) fn parse_member_key(key: &str) -> Result<(&str, &str, Option<Vec<&str>>)> {
    let invalid = || Error::Configuration(format!("Invalid member signature '{key}'"));

    let (type_name, member) = key.split_once("::").ok_or_else(invalid)?;
    if type_name.is_empty() || member.is_empty() {
        return Err(invalid());
    }

    let Some(open) = member.find('(') else {
        return Ok((type_name, member, None));
    };
    let name = &member[..open];
    let params = member[open + 1..].strip_suffix(')').ok_or_else(invalid)?;
    if name.is_empty() {
        return Err(invalid());
    }

    let params = if params.trim().is_empty() {
        Vec::new()
    } else {
        params.split(',').map(str::trim).collect()
    };
    Ok((type_name, name, Some(params)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_keys() {
        assert_eq!(
            parse_member_key("Game.World::Log(System.String)").unwrap(),
            ("Game.World", "Log", Some(vec!["System.String"]))
        );
        assert_eq!(
            parse_member_key("Game.Player::Teleport(System.Int32, System.Int32)").unwrap(),
            (
                "Game.Player",
                "Teleport",
                Some(vec!["System.Int32", "System.Int32"])
            )
        );
        assert_eq!(
            parse_member_key("Game.Player::Reset()").unwrap(),
            ("Game.Player", "Reset", Some(vec![]))
        );
        assert_eq!(
            parse_member_key("Game.Player::Health").unwrap(),
            ("Game.Player", "Health", None)
        );

        for invalid in ["Game.Player", "::Health", "Game.Player::", "Game.Player::Log(", "Game.Player::(int)"] {
            assert!(parse_member_key(invalid).is_err(), "{invalid}");
        }
    }
}
