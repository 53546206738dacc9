//! Loadable module contract.
//!
//! A module is opened by a [`ModuleOpener`] into a [`ModuleImage`]; the image
//! hands out the module's [`ModuleHooks`], the lifecycle callbacks the
//! registry drives during load and unload.
//!
//! # Lifecycle
//!
//! ```text
//! open ─▶ dependencies(check) ─▶ init ─▶ link at head ─▶ resolve (every module)
//!                                                         │
//!                       register_devices ◀────────────────┘
//!                              │
//!                   register_instructions ─▶ loaded
//!
//! unload: finalize (veto?) ─▶ unlink ─▶ unpatch ─▶ close ─▶ resolve (remaining)
//! ```
//!
//! Every callback runs with the loader lock held and receives a context bound
//! to the loader state. Callbacks must not call back into the registry
//! itself; doing so fails with `ReentrantTransaction`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

pub mod context;
pub mod native;
pub mod record;
pub mod static_image;

pub use context::{
    DependencyContext, DependencyMode, DeviceContext, InitContext, InstructionContext,
    ResolveContext,
};
pub use native::{ModuleDescriptor, NativeModuleOpener, DESCRIPTOR_SYMBOL, MODULE_ABI_VERSION};
pub use record::{DeviceBinding, EntryPoint, ModuleFlags, ModuleRecord};
pub use static_image::{StaticModule, StaticOpener};

/// Address of a resolvable routine or data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryAddress(usize);

impl EntryAddress {
    pub const fn new(address: usize) -> Self {
        Self(address)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Stable identity of a module binary.
///
/// Two images with the same identity are the same binary, whatever file name
/// they were opened under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleIdentity(String);

impl ModuleIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lifecycle callbacks a module implements.
///
/// Only `dependencies` is required; a module that has nothing to register
/// leaves the rest as no-ops.
pub trait ModuleHooks: Send + Sync {
    /// Declare (core module) or check (every other module) the shared
    /// structures this module was built against.
    fn dependencies(&self, deps: &mut DependencyContext<'_>);

    /// Register the module's named entry points.
    fn init(&self, _ctx: &mut InitContext<'_>) {}

    /// Resolve references to entry points owned by other modules. Runs again
    /// after every change to the module chain.
    fn resolve(&self, _ctx: &mut ResolveContext<'_>) {}

    /// Register device-type handlers.
    fn register_devices(&self, _ctx: &mut DeviceContext<'_>) {}

    /// Register instruction implementations.
    fn register_instructions(&self, _ctx: &mut InstructionContext<'_>) {}

    /// Called before unload and during termination. `Err(status)` vetoes an
    /// unload.
    fn finalize(&self) -> Result<(), i32> {
        Ok(())
    }
}

/// An opened module.
pub trait ModuleImage: Send + Sync {
    fn identity(&self) -> ModuleIdentity;

    /// The module's hooks, `None` if it has no dependency section.
    fn hooks(&self) -> Option<Arc<dyn ModuleHooks>>;

    /// Raw symbol lookup.
    fn symbol(&self, name: &str) -> Option<EntryAddress>;
}

/// Host primitive that opens a module file. Closing is dropping the image.
pub trait ModuleOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleImage>, String>;
}

/// Display name of a requested module: the text after the last `/`.
pub fn display_name(requested: &str) -> &str {
    requested
        .rsplit_once('/')
        .map(|(_, tail)| tail)
        .unwrap_or(requested)
}
