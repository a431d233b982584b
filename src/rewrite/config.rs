//! Configuration of a rewrite session.
//!
//! `rewrite_enabled` and `paranoid_mode` are orthogonal: paranoid detection runs the same way
//! whether or not rewrites are applied.

use crate::module::Platform;

/// Configuration for a rewrite session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct RewriteConfig {
    /// Apply rewrites; when disabled, rewrite handlers only report what they would change
    pub rewrite_enabled: bool,

    /// Flag console, filesystem and process access
    pub paranoid_mode: bool,

    /// Modules whose references are checked against the loaded symbol universe
    pub trusted_module_names: Vec<String>,

    /// Platform whose target modules replace the retired ones
    pub platform_target: Platform,

    /// Retired module names whose references are redirected to target modules
    pub strip_module_names: Vec<String>,

    /// Treat references to missing symbols as fatal instead of as warnings
    pub broken_references_are_fatal: bool,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            rewrite_enabled: true,
            paranoid_mode: false,
            trusted_module_names: Vec::new(),
            platform_target: current_platform(),
            strip_module_names: Vec::new(),
            broken_references_are_fatal: false,
        }
    }
}

impl RewriteConfig {
    /// Report what would be rewritten without changing anything
    #[must_use]
    pub fn detect_only() -> Self {
        Self {
            rewrite_enabled: false,
            ..Self::default()
        }
    }

    /// Rewrite and additionally flag console, filesystem and process access
    #[must_use]
    pub fn paranoid() -> Self {
        Self {
            paranoid_mode: true,
            ..Self::default()
        }
    }

    /// Paranoid rewriting where a reference to a missing symbol makes the module fail
    #[must_use]
    pub fn strict() -> Self {
        Self {
            paranoid_mode: true,
            broken_references_are_fatal: true,
            ..Self::default()
        }
    }

    /// Enable or disable rewriting.
    #[must_use]
    pub fn with_rewrite(mut self, enabled: bool) -> Self {
        self.rewrite_enabled = enabled;
        self
    }

    /// Enable or disable paranoid detection.
    #[must_use]
    pub fn with_paranoid(mut self, enabled: bool) -> Self {
        self.paranoid_mode = enabled;
        self
    }

    /// Set the trusted module names.
    #[must_use]
    pub fn with_trusted<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_module_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the target platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform_target = platform;
        self
    }

    /// Set the retired module names.
    #[must_use]
    pub fn with_strip<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strip_module_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Choose whether broken references are fatal.
    #[must_use]
    pub fn with_broken_fatal(mut self, fatal: bool) -> Self {
        self.broken_references_are_fatal = fatal;
        self
    }
}

/// The platform this library was compiled for, Windows if it is none of the known ones.
#[must_use]
pub fn current_platform() -> Platform {
    if cfg!(target_os = "linux") {
        Platform::Linux
    } else if cfg!(target_os = "macos") {
        Platform::MacOs
    } else {
        Platform::Windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_config_presets() {
        let default = RewriteConfig::default();
        assert!(default.rewrite_enabled);
        assert!(!default.paranoid_mode);
        assert!(!default.broken_references_are_fatal);
        assert_eq!(default.platform_target, current_platform());

        let detect = RewriteConfig::detect_only();
        assert!(!detect.rewrite_enabled);
        assert!(!detect.paranoid_mode);

        let paranoid = RewriteConfig::paranoid();
        assert!(paranoid.rewrite_enabled);
        assert!(paranoid.paranoid_mode);
        assert!(!paranoid.broken_references_are_fatal);

        let strict = RewriteConfig::strict();
        assert!(strict.paranoid_mode);
        assert!(strict.broken_references_are_fatal);
    }

    #[test]
    fn test_setters() {
        let config = RewriteConfig::detect_only()
            .with_paranoid(true)
            .with_trusted(["Host"])
            .with_platform(Platform::Linux)
            .with_strip(["Host.Win32"])
            .with_broken_fatal(true)
            .with_rewrite(true);

        assert!(config.rewrite_enabled);
        assert!(config.paranoid_mode);
        assert_eq!(config.trusted_module_names, vec!["Host"]);
        assert_eq!(config.platform_target, Platform::Linux);
        assert_eq!(config.strip_module_names, vec!["Host.Win32"]);
        assert!(config.broken_references_are_fatal);
    }
}
