//! Platform and target module remapping.
//!
//! Hosts retire platform-specific modules over time (`Host.Win32` gives way to `Host.Desktop`).
//! A [`PlatformAssemblyMap`] knows which module names are retired on the current platform and
//! which target modules replace them. Type references scoped to a retired module are redirected
//! to the lowest-version target that declares the type and still satisfies the version the
//! plugin was built against.
//!
//! The map owns the parsed target modules and, for targets loaded from disk, their open file
//! handles. They are released by [`PlatformAssemblyMap::close`] or when the map is dropped,
//! whichever comes first.
//!
//! # Examples
//!
//! ```rust,no_run
//! use modcompat::module::{Platform, Version};
//! use modcompat::platform::{PlatformAssemblyMap, TargetDescriptor};
//!
//! let mut map = PlatformAssemblyMap::new(
//!     Platform::Windows,
//!     ["Host.Win32"],
//!     vec![TargetDescriptor::from_file("targets/Host.Desktop.pmod")],
//! )?;
//! if let Some(target) = map.select("Host.Native.Window", &Version::new(1, 0, 0, 0)) {
//!     println!("Window now lives in {} {}", target.reference().name, target.reference().version);
//! }
//! map.close();
//! # Ok::<(), modcompat::Error>(())
//! ```

mod target;

pub use target::{TargetDescriptor, TargetModule};

use std::collections::HashSet;

use log::debug;

use crate::{
    module::{Platform, Version},
    Error, Result,
};

/// Retired module names and their replacement targets for one platform.
pub struct PlatformAssemblyMap {
    platform: Platform,
    strip: HashSet<String>,
    targets: Vec<TargetModule>,
    closed: bool,
}

impl PlatformAssemblyMap {
    /// Build the map for `platform`, loading every target that applies to it.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if a target carries a retired name, and the load error
    /// of the first target that cannot be read.
    pub fn new<I, S>(platform: Platform, strip: I, targets: Vec<TargetDescriptor>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let strip: HashSet<String> = strip.into_iter().map(Into::into).collect();

        let mut loaded = Vec::new();
        for descriptor in targets {
            if !descriptor.applies_to(platform) {
                continue;
            }
            let target = descriptor.load()?;
            if strip.contains(&target.reference().name) {
                return Err(Error::Configuration(format!(
                    "Module '{}' is both retired and a target",
                    target.reference().name
                )));
            }
            loaded.push(target);
        }

        debug!(
            "Platform map for {}: {} retired modules, {} targets",
            platform,
            strip.len(),
            loaded.len()
        );

        Ok(PlatformAssemblyMap {
            platform,
            strip,
            targets: loaded,
            closed: false,
        })
    }

    /// The platform the map was built for.
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Returns `true` if references to `module_name` must be redirected.
    #[must_use]
    pub fn is_stripped(&self, module_name: &str) -> bool {
        self.strip.contains(module_name)
    }

    /// The retired module names, sorted.
    #[must_use]
    pub fn stripped_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strip.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The loaded targets; empty once closed.
    #[must_use]
    pub fn targets(&self) -> &[TargetModule] {
        &self.targets
    }

    /// The target with exactly this name and version.
    #[must_use]
    pub fn target(&self, name: &str, version: &Version) -> Option<&TargetModule> {
        self.targets.iter().find(|target| {
            target.reference().name == name && target.reference().version == *version
        })
    }

    /// Returns `true` if any target is called `name`.
    #[must_use]
    pub fn is_target(&self, name: &str) -> bool {
        self.targets
            .iter()
            .any(|target| target.reference().name == name)
    }

    /// The lowest-version target declaring `full_name` whose version satisfies `required`.
    #[must_use]
    pub fn select(&self, full_name: &str, required: &Version) -> Option<&TargetModule> {
        self.targets
            .iter()
            .filter(|target| target.reference().version.satisfies(required))
            .filter(|target| target.module().find_type_def(full_name).is_some())
            .min_by_key(|target| target.reference().version)
    }

    /// Release all target modules and file handles. Lookups find nothing afterwards.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        debug!(
            "Closing platform map for {} ({} targets)",
            self.platform,
            self.targets.len()
        );
        self.targets.clear();
        self.closed = true;
    }

    /// Returns `true` once [`PlatformAssemblyMap::close`] ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for PlatformAssemblyMap {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PlatformAssemblyMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformAssemblyMap")
            .field("platform", &self.platform)
            .field("strip", &self.stripped_names())
            .field("targets", &self.targets)
            .field("closed", &self.closed)
            .finish()
    }
}
