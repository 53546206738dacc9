//! Loader configuration.
//!
//! Defaults are built in; a TOML file and environment variables may override
//! them. Everything here is process-lifetime only, nothing is persisted.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{HdlError, Result};

/// Default values.
pub mod defaults {
    /// Directory searched for loadable modules.
    #[cfg(windows)]
    pub const MODULE_PATH: &str = ".";
    #[cfg(not(windows))]
    pub const MODULE_PATH: &str = "/usr/local/lib/hercules";

    /// Prefix used to derive a device module name from a device type.
    pub const DEVICE_MODULE_PREFIX: &str = "hdt_";

    /// Platform module suffix appended during open attempts.
    pub const MODULE_SUFFIX: &str = std::env::consts::DLL_SUFFIX;
}

/// Environment variable names.
pub mod env_vars {
    pub const MODULE_PATH: &str = "HDL_MODULE_PATH";
    pub const MODULE_SUFFIX: &str = "HDL_MODULE_SUFFIX";
}

/// Options for a single load request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Suppress the open-failure message (used for implicit loads).
    pub no_message: bool,
    /// The module may never be unloaded.
    pub no_unload: bool,
    /// Load even if the dependency check fails.
    pub force: bool,
}

impl LoadOptions {
    /// Options with every flag cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `no_message`.
    pub fn quiet(mut self) -> Self {
        self.no_message = true;
        self
    }

    /// Set `no_unload`.
    pub fn resident(mut self) -> Self {
        self.no_unload = true;
        self
    }

    /// Set `force`.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Build options from operator flag words (`nomsg`, `nounload`, `force`).
    pub fn from_words<'a>(words: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut options = Self::default();
        for word in words {
            match word.to_ascii_lowercase().as_str() {
                "nomsg" | "no-message" => options.no_message = true,
                "nounload" | "no-unload" => options.no_unload = true,
                "force" => options.force = true,
                other => return Err(HdlError::InvalidOptions(other.to_string())),
            }
        }
        Ok(options)
    }
}

/// One entry of the preload list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PreloadEntry {
    /// Module name as passed to `load`.
    pub name: String,
    /// Options for the load.
    #[serde(default)]
    pub options: LoadOptions,
}

impl PreloadEntry {
    pub fn new(name: impl Into<String>, options: LoadOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

/// Built-in preload list, applied once at startup.
pub fn default_preload() -> Vec<PreloadEntry> {
    vec![
        PreloadEntry::new("hdteq", LoadOptions::new().quiet()),
        PreloadEntry::new("dyncrypt", LoadOptions::new().quiet()),
    ]
}

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Directory searched for modules.
    pub module_path: PathBuf,
    /// Suffix tried during open attempts; empty disables suffixing.
    pub module_suffix: String,
    /// Prefix for derived device module names.
    pub device_module_prefix: String,
    /// Modules loaded at startup, in order.
    pub preload: Vec<PreloadEntry>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            module_path: PathBuf::from(defaults::MODULE_PATH),
            module_suffix: defaults::MODULE_SUFFIX.to_string(),
            device_module_prefix: defaults::DEVICE_MODULE_PREFIX.to_string(),
            preload: default_preload(),
        }
    }
}

impl LoaderConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| HdlError::Config(e.to_string()))
    }

    /// Read a configuration file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HdlError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Apply `HDL_MODULE_PATH` / `HDL_MODULE_SUFFIX` if set.
    pub fn apply_env(mut self) -> Self {
        if let Ok(path) = std::env::var(env_vars::MODULE_PATH) {
            if !path.is_empty() {
                self.module_path = PathBuf::from(path);
            }
        }
        if let Ok(suffix) = std::env::var(env_vars::MODULE_SUFFIX) {
            self.module_suffix = suffix;
        }
        self
    }

    /// Set the module search path.
    pub fn with_module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_path = path.into();
        self
    }

    /// Set the module suffix.
    pub fn with_module_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.module_suffix = suffix.into();
        self
    }

    /// Replace the preload list.
    pub fn with_preload(mut self, preload: Vec<PreloadEntry>) -> Self {
        self.preload = preload;
        self
    }

    /// Device module name for a device type: prefix plus lower-cased type.
    pub fn device_module_name(&self, device_type: &str) -> String {
        format!("{}{}", self.device_module_prefix, device_type).to_lowercase()
    }

    /// Candidate file names tried, in order, when opening `name`.
    ///
    /// The name is tried verbatim first. Relative names are then tried under
    /// the search path, bare and suffixed, and finally suffixed on their own.
    /// A name that already carries the suffix is never suffixed again.
    pub fn open_candidates(&self, name: &str) -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(name)];

        let relative = !(name.starts_with('/') || name.starts_with('.') || Path::new(name).is_absolute());
        if !relative {
            return candidates;
        }

        let suffixed = if self.module_suffix.is_empty() || name.ends_with(&self.module_suffix) {
            None
        } else {
            Some(format!("{}{}", name, self.module_suffix))
        };

        if !self.module_path.as_os_str().is_empty() {
            candidates.push(self.module_path.join(name));
            if let Some(suffixed) = &suffixed {
                candidates.push(self.module_path.join(suffixed));
            }
        }
        if let Some(suffixed) = suffixed {
            candidates.push(PathBuf::from(suffixed));
        }

        candidates
    }
}
