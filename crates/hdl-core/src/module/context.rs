//! Contexts handed to module hooks.
//!
//! Each context is bound to the module being loaded and to the locked loader
//! state, so a hook registers into the right module without any global
//! "current module" pointer.

use tracing::{debug, warn};

use super::record::{DeviceBinding, EntryPoint, ModuleRecord};
use super::EntryAddress;
use crate::device::{DeviceHandlerRef, TypeEquateFn};
use crate::dispatch::{self, ArchFlags, InstructionBinding, OpcodeTable};
use crate::error::DependencyMismatch;
use crate::ledger::DependencyLedger;
use crate::resolver;

/// How dependency triples are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyMode {
    /// Core module startup: records are authoritative.
    Declare,
    /// Every other module: records are checked against the ledger.
    Check,
}

/// Passed to [`ModuleHooks::dependencies`](super::ModuleHooks::dependencies).
pub struct DependencyContext<'a> {
    ledger: &'a mut DependencyLedger,
    mode: DependencyMode,
    module: &'a str,
    failures: Vec<DependencyMismatch>,
}

impl<'a> DependencyContext<'a> {
    pub(crate) fn new(
        ledger: &'a mut DependencyLedger,
        mode: DependencyMode,
        module: &'a str,
    ) -> Self {
        Self {
            ledger,
            mode,
            module,
            failures: Vec::new(),
        }
    }

    pub fn mode(&self) -> DependencyMode {
        self.mode
    }

    /// Declare or check one dependency.
    pub fn depend(&mut self, name: &str, version: &str, size: usize) {
        match self.mode {
            DependencyMode::Declare => self.ledger.declare(name, version, size),
            DependencyMode::Check => {
                if let Err(mismatch) = self.ledger.check(name, version, size) {
                    warn!(module = %self.module, "{}", mismatch);
                    self.failures.push(mismatch);
                }
            }
        }
    }

    /// Declare or check a dependency sized by `T`.
    pub fn depend_on<T>(&mut self, name: &str, version: &str) {
        self.depend(name, version, std::mem::size_of::<T>());
    }

    pub(crate) fn into_failures(self) -> Vec<DependencyMismatch> {
        self.failures
    }
}

/// Passed to [`ModuleHooks::init`](super::ModuleHooks::init).
pub struct InitContext<'a> {
    module: &'a mut ModuleRecord,
    /// Installed equate function and the module that installed it
    type_equates: &'a mut Option<(String, TypeEquateFn)>,
}

impl<'a> InitContext<'a> {
    pub(crate) fn new(
        module: &'a mut ModuleRecord,
        type_equates: &'a mut Option<(String, TypeEquateFn)>,
    ) -> Self {
        Self {
            module,
            type_equates,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module.name
    }

    /// Register an entry point owned by this module.
    pub fn register(&mut self, name: &str, address: EntryAddress) {
        self.insert(name, Some(address));
    }

    /// Register a named slot with no routine behind it yet.
    pub fn register_placeholder(&mut self, name: &str) {
        self.insert(name, None);
    }

    /// Install the device-type equate function used by handler lookup.
    ///
    /// The function stays installed until this module is unloaded.
    pub fn set_device_type_equates(&mut self, equates: TypeEquateFn) {
        if let Some((owner, _)) = self.type_equates.as_ref() {
            warn!(module = %self.module.name, previous = %owner, "Replacing device type equate function");
        }
        *self.type_equates = Some((self.module.name.clone(), equates));
    }

    fn insert(&mut self, name: &str, address: Option<EntryAddress>) {
        if let Some(existing) = self.module.entries.iter_mut().find(|e| e.name == name) {
            existing.address = address;
            return;
        }
        self.module.entries.insert(
            0,
            EntryPoint {
                name: name.to_string(),
                address,
                load_count: 0,
            },
        );
    }
}

/// Passed to [`ModuleHooks::resolve`](super::ModuleHooks::resolve).
pub struct ResolveContext<'a> {
    modules: &'a mut [ModuleRecord],
}

impl<'a> ResolveContext<'a> {
    pub(crate) fn new(modules: &'a mut [ModuleRecord]) -> Self {
        Self { modules }
    }

    /// Resolve a name across the whole chain.
    pub fn resolve(&mut self, name: &str) -> Option<EntryAddress> {
        resolver::resolve(self.modules, name)
    }

    /// The next same-named entry point after `previous`.
    pub fn resolve_next(&self, previous: EntryAddress) -> Option<EntryAddress> {
        resolver::resolve_next(self.modules, previous)
    }
}

/// Passed to [`ModuleHooks::register_devices`](super::ModuleHooks::register_devices).
pub struct DeviceContext<'a> {
    module: &'a mut ModuleRecord,
}

impl<'a> DeviceContext<'a> {
    pub(crate) fn new(module: &'a mut ModuleRecord) -> Self {
        Self { module }
    }

    /// Bind a device type to a handler table.
    pub fn register(&mut self, device_type: &str, handler: DeviceHandlerRef) {
        debug!(module = %self.module.name, device_type, "Registering device type");
        self.module.devices.insert(
            0,
            DeviceBinding {
                device_type: device_type.to_string(),
                handler,
            },
        );
    }
}

/// Passed to [`ModuleHooks::register_instructions`](super::ModuleHooks::register_instructions).
pub struct InstructionContext<'a> {
    bindings: &'a mut Vec<InstructionBinding>,
    table: &'a mut dyn OpcodeTable,
    module: &'a str,
}

impl<'a> InstructionContext<'a> {
    pub(crate) fn new(
        bindings: &'a mut Vec<InstructionBinding>,
        table: &'a mut dyn OpcodeTable,
        module: &'a str,
    ) -> Self {
        Self {
            bindings,
            table,
            module,
        }
    }

    /// Patch `routine` into the dispatch table at `opcode` for every mode in
    /// `arch`.
    pub fn register(&mut self, arch: ArchFlags, opcode: u16, name: &str, routine: EntryAddress) {
        let binding = dispatch::patch(&mut *self.table, arch, opcode, name, routine);
        debug!(
            module = %self.module,
            instruction = name,
            opcode = %binding.opcode,
            "Patched instruction"
        );
        self.bindings.push(binding);
    }
}
