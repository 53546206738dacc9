//! Common test utilities for loader tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use hdl_core::device::{DeviceActivity, DeviceHandler, DeviceHandlerRef, TypeEquateFn};
use hdl_core::module::{
    DependencyContext, DeviceContext, InitContext, InstructionContext, ResolveContext,
};
use hdl_core::{
    ArchFlags, CoreModule, CryptoFacility, EntryAddress, LoaderConfig, ModuleHooks,
    ModuleRegistry, ShutdownSequencer, StaticModule, StaticOpener,
};

pub type ResolveHook = Arc<dyn Fn(&mut ResolveContext<'_>) + Send + Sync>;

/// A module whose hooks replay a fixed script.
#[derive(Default, Clone)]
pub struct ScriptedModule {
    pub dependencies: Vec<(String, String, usize)>,
    pub entries: Vec<(String, EntryAddress)>,
    pub devices: Vec<(String, DeviceHandlerRef)>,
    pub instructions: Vec<(ArchFlags, u16, String, EntryAddress)>,
    pub on_resolve: Option<ResolveHook>,
    pub equates: Option<TypeEquateFn>,
    /// Non-zero vetoes unload
    pub finalize_status: Arc<AtomicI32>,
    /// Shared record of finalize calls
    pub journal: Option<Arc<Mutex<Vec<String>>>>,
    pub name: String,
}

impl ScriptedModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn depend(mut self, name: &str, version: &str, size: usize) -> Self {
        self.dependencies
            .push((name.to_string(), version.to_string(), size));
        self
    }

    pub fn entry(mut self, name: &str, address: usize) -> Self {
        self.entries
            .push((name.to_string(), EntryAddress::new(address)));
        self
    }

    pub fn device(mut self, device_type: &str, handler: DeviceHandlerRef) -> Self {
        self.devices.push((device_type.to_string(), handler));
        self
    }

    pub fn instruction(mut self, arch: ArchFlags, opcode: u16, name: &str, routine: usize) -> Self {
        self.instructions
            .push((arch, opcode, name.to_string(), EntryAddress::new(routine)));
        self
    }

    pub fn resolving(mut self, hook: ResolveHook) -> Self {
        self.on_resolve = Some(hook);
        self
    }

    pub fn equating(mut self, equates: TypeEquateFn) -> Self {
        self.equates = Some(equates);
        self
    }

    pub fn journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(journal);
        self
    }
}

impl ModuleHooks for ScriptedModule {
    fn dependencies(&self, deps: &mut DependencyContext<'_>) {
        for (name, version, size) in &self.dependencies {
            deps.depend(name, version, *size);
        }
    }

    fn init(&self, ctx: &mut InitContext<'_>) {
        for (name, address) in &self.entries {
            ctx.register(name, *address);
        }
        if let Some(equates) = &self.equates {
            ctx.set_device_type_equates(Arc::clone(equates));
        }
    }

    fn resolve(&self, ctx: &mut ResolveContext<'_>) {
        if let Some(hook) = &self.on_resolve {
            hook(ctx);
        }
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

    fn finalize(&self) -> Result<(), i32> {
        if let Some(journal) = &self.journal {
            journal.lock().push(self.name.clone());
        }
        match self.finalize_status.load(Ordering::SeqCst) {
            0 => Ok(()),
            status => Err(status),
        }
    }
}

/// Device handler table used by fixtures.
pub struct TestHandler(pub &'static str);

impl DeviceHandler for TestHandler {
    fn describe(&self) -> &str {
        self.0
    }
}

/// Simulated device configuration.
#[derive(Default)]
pub struct FakeDevices {
    attached: Mutex<Vec<(u16, DeviceHandlerRef)>>,
}

impl FakeDevices {
    pub fn attach(&self, devnum: u16, handler: DeviceHandlerRef) {
        self.attached.lock().push((devnum, handler));
    }

    pub fn detach(&self, devnum: u16) {
        self.attached.lock().retain(|(n, _)| *n != devnum);
    }
}

impl DeviceActivity for FakeDevices {
    fn device_using(&self, handler: &DeviceHandlerRef) -> Option<u16> {
        self.attached
            .lock()
            .iter()
            .find(|(_, h)| h.ptr_eq(handler))
            .map(|(devnum, _)| *devnum)
    }
}

/// A started registry plus the collaborators tests poke at.
pub struct Harness {
    pub registry: Arc<ModuleRegistry>,
    pub shutdown: ShutdownSequencer,
    pub opener: StaticOpener,
    pub devices: Arc<FakeDevices>,
    pub crypto: Arc<CryptoFacility>,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(CoreModule::new())
    }

    pub fn start_with(core: CoreModule) -> Self {
        Self::start_with_opener(core, StaticOpener::new())
    }

    pub fn start_with_opener(core: CoreModule, opener: StaticOpener) -> Self {
        let shutdown = ShutdownSequencer::new();
        let devices = Arc::new(FakeDevices::default());
        let crypto = core.crypto();
        let registry = ModuleRegistry::builder(test_config())
            .opener(Arc::new(opener.clone()))
            .device_activity(devices.clone())
            .start(Arc::new(core), &shutdown)
            .unwrap();
        Self {
            registry,
            shutdown,
            opener,
            devices,
            crypto,
        }
    }

    /// Serve `module` under `path` with the module's name as identity.
    pub fn install(&self, path: &str, module: ScriptedModule) {
        let identity = module.name.clone();
        install_as(&self.opener, path, &identity, module, &[]);
    }
}

/// Serve `module` under `path` with an explicit identity and raw symbols.
pub fn install_as(
    opener: &StaticOpener,
    path: &str,
    identity: &str,
    module: ScriptedModule,
    symbols: &[(&str, usize)],
) {
    let hooks: Arc<dyn ModuleHooks> = Arc::new(module);
    let identity = identity.to_string();
    let symbols: Vec<(String, EntryAddress)> = symbols
        .iter()
        .map(|(name, address)| (name.to_string(), EntryAddress::new(*address)))
        .collect();
    opener.insert(path, move || {
        symbols.iter().fold(
            StaticModule::new(identity.clone(), hooks.clone()),
            |image, (name, address)| image.with_symbol(name.clone(), *address),
        )
    });
}

/// Configuration that resolves module names verbatim and preloads nothing.
pub fn test_config() -> LoaderConfig {
    LoaderConfig::default()
        .with_module_path("")
        .with_module_suffix("")
        .with_preload(Vec::new())
}
