//! Hooks of the always-resident core module.

use std::sync::Arc;

use crate::crypto::CryptoFacility;
use crate::device::{DeviceHandlerRef, TypeEquateFn};
use crate::dispatch::ArchFlags;
use crate::module::{
    DependencyContext, DeviceContext, EntryAddress, EntryPoint, InitContext, InstructionContext,
    ModuleDescriptor, ModuleHooks, ResolveContext, MODULE_ABI_VERSION,
};

/// Display name of the core module.
pub const CORE_MODULE_NAME: &str = "*Hercules";

/// The core module: declares the shared structures every other module is
/// checked against and owns the cryptographic facility bindings.
pub struct CoreModule {
    dependencies: Vec<(String, String, usize)>,
    entries: Vec<(String, Option<EntryAddress>)>,
    devices: Vec<(String, DeviceHandlerRef)>,
    instructions: Vec<(ArchFlags, u16, String, EntryAddress)>,
    type_equates: Option<TypeEquateFn>,
    crypto: Arc<CryptoFacility>,
}

impl Default for CoreModule {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreModule {
    pub fn new() -> Self {
        Self {
            dependencies: vec![
                (
                    "HDL_ABI".to_string(),
                    MODULE_ABI_VERSION.to_string(),
                    std::mem::size_of::<ModuleDescriptor>(),
                ),
                (
                    "ENTRY_POINT".to_string(),
                    env!("CARGO_PKG_VERSION").to_string(),
                    std::mem::size_of::<EntryPoint>(),
                ),
            ],
            entries: Vec::new(),
            devices: Vec::new(),
            instructions: Vec::new(),
            type_equates: None,
            crypto: Arc::new(CryptoFacility::new()),
        }
    }

    pub fn with_dependency(mut self, name: &str, version: &str, size: usize) -> Self {
        self.dependencies
            .push((name.to_string(), version.to_string(), size));
        self
    }

    pub fn with_entry(mut self, name: &str, address: EntryAddress) -> Self {
        self.entries.push((name.to_string(), Some(address)));
        self
    }

    /// A named hook slot other modules may fill.
    pub fn with_placeholder(mut self, name: &str) -> Self {
        self.entries.push((name.to_string(), None));
        self
    }

    pub fn with_device(mut self, device_type: &str, handler: DeviceHandlerRef) -> Self {
        self.devices.push((device_type.to_string(), handler));
        self
    }

    pub fn with_instruction(
        mut self,
        arch: ArchFlags,
        opcode: u16,
        name: &str,
        routine: EntryAddress,
    ) -> Self {
        self.instructions
            .push((arch, opcode, name.to_string(), routine));
        self
    }

    pub fn with_type_equates(mut self, equates: TypeEquateFn) -> Self {
        self.type_equates = Some(equates);
        self
    }

    /// Shared handle to the cryptographic facility bindings.
    pub fn crypto(&self) -> Arc<CryptoFacility> {
        Arc::clone(&self.crypto)
    }
}

impl ModuleHooks for CoreModule {
    fn dependencies(&self, deps: &mut DependencyContext<'_>) {
        for (name, version, size) in &self.dependencies {
            deps.depend(name, version, *size);
        }
    }

    fn init(&self, ctx: &mut InitContext<'_>) {
        for (name, address) in &self.entries {
            match address {
                Some(address) => ctx.register(name, *address),
                None => ctx.register_placeholder(name),
            }
        }
        if let Some(equates) = &self.type_equates {
            ctx.set_device_type_equates(Arc::clone(equates));
        }
    }

    fn resolve(&self, ctx: &mut ResolveContext<'_>) {
        self.crypto.resolve(ctx);
    }

    fn register_devices(&self, ctx: &mut DeviceContext<'_>) {
        for (device_type, handler) in &self.devices {
            ctx.register(device_type, handler.clone());
        }
    }

    fn register_instructions(&self, ctx: &mut InstructionContext<'_>) {
        for (arch, opcode, name, routine) in &self.instructions {
            ctx.register(*arch, *opcode, name, *routine);
        }
    }
}
