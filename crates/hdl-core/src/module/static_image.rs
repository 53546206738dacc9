//! Modules linked into the host binary.
//!
//! [`StaticModule`] stands in for an opened shared library: it carries an
//! identity, optional hooks and a symbol table. [`StaticOpener`] serves such
//! modules by path, which lets the core module and test fixtures go through
//! the same load path as native modules.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{EntryAddress, ModuleHooks, ModuleIdentity, ModuleImage, ModuleOpener};

/// An in-process module image.
#[derive(Clone)]
pub struct StaticModule {
    identity: ModuleIdentity,
    hooks: Option<Arc<dyn ModuleHooks>>,
    symbols: HashMap<String, EntryAddress>,
}

impl StaticModule {
    pub fn new(identity: impl Into<String>, hooks: Arc<dyn ModuleHooks>) -> Self {
        Self {
            identity: ModuleIdentity::new(identity),
            hooks: Some(hooks),
            symbols: HashMap::new(),
        }
    }

    /// A module with no dependency section.
    pub fn without_hooks(identity: impl Into<String>) -> Self {
        Self {
            identity: ModuleIdentity::new(identity),
            hooks: None,
            symbols: HashMap::new(),
        }
    }

    /// Builder: export a raw symbol.
    pub fn with_symbol(mut self, name: impl Into<String>, address: EntryAddress) -> Self {
        self.symbols.insert(name.into(), address);
        self
    }
}

impl ModuleImage for StaticModule {
    fn identity(&self) -> ModuleIdentity {
        self.identity.clone()
    }

    fn hooks(&self) -> Option<Arc<dyn ModuleHooks>> {
        self.hooks.clone()
    }

    fn symbol(&self, name: &str) -> Option<EntryAddress> {
        self.symbols.get(name).copied()
    }
}

type ModuleFactory = Arc<dyn Fn() -> StaticModule + Send + Sync>;

/// Opener serving [`StaticModule`]s registered by path.
#[derive(Default, Clone)]
pub struct StaticOpener {
    modules: Arc<RwLock<HashMap<PathBuf, ModuleFactory>>>,
}

impl StaticOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `path` with a fresh image from `factory` on every open.
    pub fn insert<F>(&self, path: impl Into<PathBuf>, factory: F)
    where
        F: Fn() -> StaticModule + Send + Sync + 'static,
    {
        self.modules.write().insert(path.into(), Arc::new(factory));
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_module<F>(self, path: impl Into<PathBuf>, factory: F) -> Self
    where
        F: Fn() -> StaticModule + Send + Sync + 'static,
    {
        self.insert(path, factory);
        self
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.modules.write().remove(path).is_some()
    }
}

impl ModuleOpener for StaticOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleImage>, String> {
        let factory = self
            .modules
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| format!("{}: cannot open shared object file", path.display()))?;
        Ok(Box::new(factory()))
    }
}
