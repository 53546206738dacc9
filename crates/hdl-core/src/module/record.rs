//! Per-module bookkeeping owned by the registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{EntryAddress, ModuleHooks, ModuleIdentity, ModuleImage};
use crate::device::DeviceHandlerRef;
use crate::dispatch::InstructionBinding;

bitflags::bitflags! {
    /// Module state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModuleFlags: u32 {
        /// The always-resident core module.
        const MAIN = 1 << 0;
        /// May never be unloaded.
        const NO_UNLOAD = 1 << 1;
        /// Loaded despite a failed dependency check.
        const WAS_FORCED = 1 << 2;
    }
}

/// A named entry point owned by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    /// `None` for a placeholder slot nobody has filled yet
    pub address: Option<EntryAddress>,
    pub load_count: u32,
}

/// A device type served by a module.
#[derive(Clone)]
pub struct DeviceBinding {
    pub device_type: String,
    pub handler: DeviceHandlerRef,
}

impl std::fmt::Debug for DeviceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBinding")
            .field("device_type", &self.device_type)
            .finish_non_exhaustive()
    }
}

/// A module in the chain.
///
/// Field order matters: bindings and hooks point into the module's code and
/// are dropped before the image closes it.
pub struct ModuleRecord {
    pub(crate) name: String,
    pub(crate) flags: ModuleFlags,
    pub(crate) identity: ModuleIdentity,
    pub(crate) loaded_at: DateTime<Utc>,
    /// Head first
    pub(crate) entries: Vec<EntryPoint>,
    /// Head first
    pub(crate) devices: Vec<DeviceBinding>,
    /// Registration order
    pub(crate) instructions: Vec<InstructionBinding>,
    pub(crate) hooks: Arc<dyn ModuleHooks>,
    pub(crate) image: Box<dyn ModuleImage>,
}

impl ModuleRecord {
    pub(crate) fn new(
        name: impl Into<String>,
        flags: ModuleFlags,
        hooks: Arc<dyn ModuleHooks>,
        image: Box<dyn ModuleImage>,
    ) -> Self {
        Self {
            name: name.into(),
            flags,
            identity: image.identity(),
            loaded_at: Utc::now(),
            entries: Vec::new(),
            devices: Vec::new(),
            instructions: Vec::new(),
            hooks,
            image,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> ModuleFlags {
        self.flags
    }

    pub fn is_main(&self) -> bool {
        self.flags.contains(ModuleFlags::MAIN)
    }

    /// Main and no-unload modules stay resident.
    pub fn is_protected(&self) -> bool {
        self.flags
            .intersects(ModuleFlags::MAIN | ModuleFlags::NO_UNLOAD)
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn entries(&self) -> &[EntryPoint] {
        &self.entries
    }

    pub fn devices(&self) -> &[DeviceBinding] {
        &self.devices
    }

    pub fn instructions(&self) -> &[InstructionBinding] {
        &self.instructions
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("identity", &self.identity)
            .field("entries", &self.entries)
            .field("devices", &self.devices)
            .field("instructions", &self.instructions)
            .finish_non_exhaustive()
    }
}
