use std::{
    fmt,
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    file::File,
    module::{MemberShape, Module, ModuleRef, Platform},
    Result,
};

enum TargetSource {
    File(PathBuf),
    Module(Module),
}

/// Where a target module comes from and which platforms it serves.
pub struct TargetDescriptor {
    source: TargetSource,
    platforms: Vec<Platform>,
}

impl TargetDescriptor {
    /// A target loaded from a module file when the map is built.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        TargetDescriptor {
            source: TargetSource::File(path.as_ref().to_path_buf()),
            platforms: Vec::new(),
        }
    }

    /// A target that is already in memory.
    #[must_use]
    pub fn from_module(module: Module) -> Self {
        TargetDescriptor {
            source: TargetSource::Module(module),
            platforms: Vec::new(),
        }
    }

    /// Restrict the target to `platforms`; without a restriction it serves every platform.
    #[must_use]
    pub fn for_platforms(mut self, platforms: &[Platform]) -> Self {
        self.platforms = platforms.to_vec();
        self
    }

    /// Returns `true` if the target serves `platform`.
    #[must_use]
    pub fn applies_to(&self, platform: Platform) -> bool {
        self.platforms.is_empty() || self.platforms.contains(&platform)
    }

    pub(crate) fn load(self) -> Result<TargetModule> {
        match self.source {
            TargetSource::File(path) => {
                let handle = File::from_file(&path)?;
                let module = Module::from_bytes(handle.data())?;
                debug!(
                    "Loaded target module '{}' {} from {}",
                    module.name,
                    module.version,
                    path.display()
                );
                Ok(TargetModule::new(module, Some(handle)))
            }
            TargetSource::Module(module) => Ok(TargetModule::new(module, None)),
        }
    }
}

/// A loaded target module with its cached reference descriptor.
pub struct TargetModule {
    reference: ModuleRef,
    module: Module,
    handle: Option<File>,
}

impl TargetModule {
    fn new(module: Module, handle: Option<File>) -> Self {
        TargetModule {
            reference: ModuleRef {
                name: module.name.clone(),
                version: module.version,
            },
            module,
            handle,
        }
    }

    /// The row a plugin uses to reference this target.
    #[must_use]
    pub fn reference(&self) -> &ModuleRef {
        &self.reference
    }

    /// The parsed module.
    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// SHA-1 of the backing file, `None` for in-memory targets.
    #[must_use]
    pub fn digest(&self) -> Option<String> {
        self.handle.as_ref().map(File::digest)
    }

    /// Returns `true` if type `full_name` declares a member `name` of exactly `shape`.
    #[must_use]
    pub fn declares_member(&self, full_name: &str, name: &str, shape: &MemberShape) -> bool {
        let Some(index) = self.module.find_type_def(full_name) else {
            return false;
        };
        let type_def = &self.module.types[index];

        match shape {
            MemberShape::Field { .. } => type_def.fields.iter().any(|field| {
                field.name == name && MemberShape::of_field(&self.module, &field.signature) == *shape
            }),
            MemberShape::Method { .. } => type_def.methods.iter().any(|method| {
                method.name == name
                    && MemberShape::of_method(&self.module, &method.signature) == *shape
            }),
        }
    }
}

impl fmt::Debug for TargetModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetModule")
            .field("name", &self.reference.name)
            .field("version", &self.reference.version)
            .field("file_backed", &self.handle.is_some())
            .finish()
    }
}
