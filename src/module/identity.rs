//! Module identity: versions, runtime flags, attribute flags and target platforms.

use std::{fmt, str::FromStr};

use bitflags::bitflags;
use strum::{Display, EnumIter, EnumString};

use crate::{Error, Result};

/// Four-part module version (`major.minor.build.revision`).
///
/// Versions order lexicographically by component, which is what target selection relies on
/// when it picks the lowest target satisfying a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    /// Major version number
    pub major: u16,
    /// Minor version number
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl Version {
    /// Create a version from its four components.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Version {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Returns `true` if a module of this version can stand in for a reference that requires
    /// `required`.
    #[must_use]
    pub fn satisfies(&self, required: &Version) -> bool {
        self >= required
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for Version {
    type Err = Error;

    /// Parses `1`, `1.2`, `1.2.3` or `1.2.3.4`; missing components are zero.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = [0u16; 4];
        let mut count = 0;

        for part in s.trim().split('.') {
            if count == parts.len() {
                return Err(Error::Configuration(format!("Invalid version '{s}'")));
            }
            parts[count] = part
                .parse::<u16>()
                .map_err(|_| Error::Configuration(format!("Invalid version '{s}'")))?;
            count += 1;
        }

        Ok(Version::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

bitflags! {
    /// Runtime requirements recorded in the module header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModuleFlags: u16 {
        /// The module contains only managed instructions
        const IL_ONLY = 0x0001;
        /// The module can only be loaded into a 32-bit process
        const REQUIRES_32BIT = 0x0002;
        /// The module prefers a 32-bit process but runs anywhere
        const PREFERS_32BIT = 0x0004;
        /// The module carries a strong-name signature
        const STRONG_NAME_SIGNED = 0x0008;
    }
}

bitflags! {
    /// Attributes of a type definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeAttributes: u32 {
        /// Visible outside the module
        const PUBLIC = 0x0000_0001;
        /// The type is an interface
        const INTERFACE = 0x0000_0020;
        /// The type cannot be instantiated
        const ABSTRACT = 0x0000_0080;
        /// The type cannot be derived from
        const SEALED = 0x0000_0100;
    }
}

bitflags! {
    /// Attributes of a field definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldAttributes: u16 {
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Belongs to the type rather than to an instance
        const STATIC = 0x0010;
        /// Only assignable in a constructor
        const INIT_ONLY = 0x0020;
        /// Compile-time constant
        const LITERAL = 0x0040;
    }
}

bitflags! {
    /// Attributes of a method definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodAttributes: u16 {
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Belongs to the type rather than to an instance
        const STATIC = 0x0010;
        /// Dispatched through the virtual table
        const VIRTUAL = 0x0040;
        /// Has no body
        const ABSTRACT = 0x0400;
        /// Name is special to tooling (property accessors, constructors)
        const SPECIAL_NAME = 0x0800;
    }
}

/// Host platforms with their own set of target modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Platform {
    /// Windows desktop
    Windows,
    /// Linux desktop
    Linux,
    /// macOS desktop
    #[strum(to_string = "macos", serialize = "osx")]
    MacOs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        let old = Version::new(1, 4, 0, 0);
        let new = Version::new(1, 10, 0, 0);
        assert!(old < new);
        assert!(new.satisfies(&old));
        assert!(!old.satisfies(&new));
        assert!(old.satisfies(&old));
    }

    #[test]
    fn version_parse() {
        assert_eq!(
            "1.2.3.4".parse::<Version>().unwrap(),
            Version::new(1, 2, 3, 4)
        );
        assert_eq!("4.0".parse::<Version>().unwrap(), Version::new(4, 0, 0, 0));
        assert!("1.2.3.4.5".parse::<Version>().is_err());
        assert!("1.x".parse::<Version>().is_err());
        assert!("70000".parse::<Version>().is_err());
        assert_eq!(Version::new(2, 0, 1, 7).to_string(), "2.0.1.7");
    }

    #[test]
    fn module_flags_retain_unknown_bits() {
        let flags = ModuleFlags::from_bits_retain(0x8003);
        assert!(flags.contains(ModuleFlags::IL_ONLY | ModuleFlags::REQUIRES_32BIT));
        assert_eq!(flags.bits(), 0x8003);
    }

    #[test]
    fn platform_names() {
        assert_eq!("linux".parse::<Platform>().unwrap(), Platform::Linux);
        assert_eq!("Windows".parse::<Platform>().unwrap(), Platform::Windows);
        assert_eq!("osx".parse::<Platform>().unwrap(), Platform::MacOs);
        assert_eq!(Platform::MacOs.to_string(), "macos");
        assert!("amiga".parse::<Platform>().is_err());
    }
}
