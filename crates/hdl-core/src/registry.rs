//! The module registry.
//!
//! Owns the module chain and everything hanging off it: entry points, device
//! bindings, instruction bindings, the dependency ledger and the dispatch
//! table. All of it sits behind a single loader lock; a load or unload runs
//! as one transaction under that lock, module callbacks included.
//!
//! The chain is kept head first: index 0 is the most recently loaded module
//! and the core module is always last.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{LoadOptions, LoaderConfig};
use crate::core_module::CORE_MODULE_NAME;
use crate::device::{self, DeviceActivity, DeviceHandlerRef, NoDevices, TypeEquateFn};
use crate::dispatch::{self, ArchMode, DispatchTable, Opcode, OpcodeTable};
use crate::error::{HdlError, Result};
use crate::ledger::{DependencyLedger, DependencyRecord};
use crate::listing::{ListScope, ModuleListing};
use crate::module::{
    display_name, DependencyContext, DependencyMode, DeviceContext, EntryAddress, EntryPoint,
    InitContext, InstructionContext, ModuleFlags, ModuleHooks, ModuleImage, ModuleOpener,
    ModuleRecord, NativeModuleOpener, ResolveContext, StaticModule,
};
use crate::resolver;
use crate::shutdown::{ShutdownCallback, ShutdownSequencer};

/// Name of the shutdown call that runs every module's finalize hook.
pub const TERMINATION_CALL: &str = "hdl_term";

struct LoaderState {
    modules: Vec<ModuleRecord>,
    ledger: DependencyLedger,
    dispatch: Box<dyn OpcodeTable>,
    /// Equate function and the name of the module that installed it
    type_equates: Option<(String, TypeEquateFn)>,
}

/// Loader lock held by the current thread.
struct Transaction<'a> {
    state: MutexGuard<'a, LoaderState>,
    owner: &'a Mutex<Option<ThreadId>>,
}

impl Deref for Transaction<'_> {
    type Target = LoaderState;

    fn deref(&self) -> &LoaderState {
        &self.state
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut LoaderState {
        &mut self.state
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

/// Builder for [`ModuleRegistry`].
pub struct RegistryBuilder {
    config: LoaderConfig,
    opener: Arc<dyn ModuleOpener>,
    dispatch: Box<dyn OpcodeTable>,
    devices: Arc<dyn DeviceActivity>,
}

impl RegistryBuilder {
    /// Host primitive used to open modules. Defaults to the native opener.
    pub fn opener(mut self, opener: Arc<dyn ModuleOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Dispatch table patched by instruction registrations.
    pub fn dispatch_table(mut self, table: Box<dyn OpcodeTable>) -> Self {
        self.dispatch = table;
        self
    }

    /// Probe for devices using a handler, consulted before unload.
    pub fn device_activity(mut self, devices: Arc<dyn DeviceActivity>) -> Self {
        self.devices = devices;
        self
    }

    /// Create the registry with `core` as its always-resident module,
    /// register the termination call and apply the preload list.
    ///
    /// Fails only if the core module cannot be linked, which the caller
    /// should treat as fatal.
    pub fn start(
        self,
        core: Arc<dyn ModuleHooks>,
        shutdown: &ShutdownSequencer,
    ) -> Result<Arc<ModuleRegistry>> {
        let preload = self.config.preload.clone();
        let registry = Arc::new(ModuleRegistry {
            state: Mutex::new(LoaderState {
                modules: Vec::new(),
                ledger: DependencyLedger::new(),
                dispatch: self.dispatch,
                type_equates: None,
            }),
            owner: Mutex::new(None),
            config: RwLock::new(self.config),
            opener: self.opener,
            devices: self.devices,
        });

        if let Err(e) = registry.link_core(core) {
            error!(module = CORE_MODULE_NAME, code = e.code(), "{}", e);
            return Err(e);
        }

        let weak: Weak<ModuleRegistry> = Arc::downgrade(&registry);
        let terminate: ShutdownCallback = Arc::new(move |_: usize| {
            if let Some(registry) = weak.upgrade() {
                registry.terminate();
            }
        });
        shutdown.add(TERMINATION_CALL, terminate, 0);

        for entry in preload {
            // Failures are already logged, honoring the entry's options
            let _ = registry.load(&entry.name, entry.options);
        }

        info!(
            modules = registry.module_names()?.len(),
            "Dynamic loader started"
        );
        Ok(registry)
    }
}

/// The module registry.
pub struct ModuleRegistry {
    state: Mutex<LoaderState>,
    owner: Mutex<Option<ThreadId>>,
    config: RwLock<LoaderConfig>,
    opener: Arc<dyn ModuleOpener>,
    devices: Arc<dyn DeviceActivity>,
}

impl ModuleRegistry {
    pub fn builder(config: LoaderConfig) -> RegistryBuilder {
        RegistryBuilder {
            config,
            opener: Arc::new(NativeModuleOpener::new()),
            dispatch: Box::new(DispatchTable::new()),
            devices: Arc::new(NoDevices),
        }
    }

    /// Take the loader lock, rejecting re-entry from a module callback.
    fn begin(&self, operation: &str) -> Result<Transaction<'_>> {
        let me = thread::current().id();
        if *self.owner.lock() == Some(me) {
            return Err(HdlError::ReentrantTransaction(operation.to_string()));
        }
        let state = self.state.lock();
        *self.owner.lock() = Some(me);
        Ok(Transaction {
            state,
            owner: &self.owner,
        })
    }

    fn link_core(&self, hooks: Arc<dyn ModuleHooks>) -> Result<()> {
        let mut txn = self.begin("startup")?;
        let state = &mut *txn;

        {
            let mut deps =
                DependencyContext::new(&mut state.ledger, DependencyMode::Declare, CORE_MODULE_NAME);
            hooks.dependencies(&mut deps);
        }

        let image = StaticModule::new(CORE_MODULE_NAME, Arc::clone(&hooks));
        let record = ModuleRecord::new(
            CORE_MODULE_NAME,
            ModuleFlags::MAIN | ModuleFlags::NO_UNLOAD,
            hooks,
            Box::new(image),
        );
        Self::link_head(state, record)?;
        debug!(module = CORE_MODULE_NAME, "Core module linked");
        Ok(())
    }

    /// Link `record` at the head of the chain and run its registration hooks.
    fn link_head(state: &mut LoaderState, record: ModuleRecord) -> Result<()> {
        state
            .modules
            .try_reserve(1)
            .map_err(|_| HdlError::AllocationFailure(record.name.clone()))?;
        let hooks = Arc::clone(&record.hooks);
        state.modules.insert(0, record);

        hooks.init(&mut InitContext::new(
            &mut state.modules[0],
            &mut state.type_equates,
        ));

        Self::refresh_bindings(state);

        hooks.register_devices(&mut DeviceContext::new(&mut state.modules[0]));

        let head = &mut state.modules[0];
        hooks.register_instructions(&mut InstructionContext::new(
            &mut head.instructions,
            &mut *state.dispatch,
            &head.name,
        ));
        Ok(())
    }

    /// Reset every load count, then let every module re-resolve its
    /// references against the current chain.
    fn refresh_bindings(state: &mut LoaderState) {
        resolver::reset_load_counts(&mut state.modules);
        let resolvers: Vec<Arc<dyn ModuleHooks>> =
            state.modules.iter().map(|m| Arc::clone(&m.hooks)).collect();
        for hooks in resolvers {
            hooks.resolve(&mut ResolveContext::new(&mut state.modules));
        }
    }

    fn report(&self, name: &str, err: &HdlError, options: LoadOptions) {
        match err {
            HdlError::OpenError { .. } if options.no_message => {
                debug!(module = name, code = err.code(), "{}", err);
            }
            _ if err.is_fatal() => error!(module = name, code = err.code(), "{}", err),
            _ => warn!(module = name, code = err.code(), "{}", err),
        }
    }

    /// Load a module by name.
    pub fn load(&self, name: &str, options: LoadOptions) -> Result<()> {
        let result = self.load_module(name, options);
        match &result {
            Ok(()) => info!(module = display_name(name), "Module loaded"),
            Err(e) => self.report(name, e, options),
        }
        result
    }

    fn load_module(&self, name: &str, options: LoadOptions) -> Result<()> {
        let module_name = display_name(name).to_string();

        {
            let txn = self.begin("load")?;
            if let Some(existing) = txn.modules.iter().find(|m| m.is_named(&module_name)) {
                return Err(HdlError::AlreadyLoaded(existing.name.clone()));
            }
        }

        let candidates = self.config.read().open_candidates(name);
        let image = self.open_image(name, &candidates)?;
        let hooks = image
            .hooks()
            .ok_or_else(|| HdlError::NoDependencySection(module_name.clone()))?;

        let mut txn = self.begin("load")?;
        let state = &mut *txn;

        if let Some(existing) = state.modules.iter().find(|m| m.is_named(&module_name)) {
            return Err(HdlError::AlreadyLoaded(existing.name.clone()));
        }

        let identity = image.identity();
        if let Some(existing) = state.modules.iter().find(|m| m.identity == identity) {
            return Err(HdlError::DuplicateModule {
                name: module_name,
                existing: existing.name.clone(),
            });
        }

        let failures = {
            let mut deps = DependencyContext::new(&mut state.ledger, DependencyMode::Check, &module_name);
            hooks.dependencies(&mut deps);
            deps.into_failures()
        };

        let mut flags = ModuleFlags::empty();
        if options.no_unload {
            flags |= ModuleFlags::NO_UNLOAD;
        }
        if let Some(mismatch) = failures.into_iter().next() {
            if !options.force {
                return Err(HdlError::DependencyMismatch {
                    module: module_name,
                    mismatch,
                });
            }
            warn!(module = %module_name, "Loading module despite failed dependency check");
            flags |= ModuleFlags::WAS_FORCED;
        }

        let record = ModuleRecord::new(module_name, flags, hooks, image);
        Self::link_head(state, record)
    }

    fn open_image(&self, name: &str, candidates: &[PathBuf]) -> Result<Box<dyn ModuleImage>> {
        let mut reason = String::from("no candidate file names");
        for path in candidates {
            match self.opener.open(path) {
                Ok(image) => {
                    debug!(module = name, path = %path.display(), "Opened module");
                    return Ok(image);
                }
                Err(e) => {
                    debug!(module = name, path = %path.display(), error = %e, "Open attempt failed");
                    reason = e;
                }
            }
        }
        Err(HdlError::OpenError {
            name: name.to_string(),
            reason,
        })
    }

    /// Unload a module by name.
    pub fn unload(&self, name: &str) -> Result<()> {
        let result = self.unload_module(name);
        match &result {
            Ok(()) => info!(module = display_name(name), "Module unloaded"),
            Err(e) => self.report(name, e, LoadOptions::new()),
        }
        result
    }

    fn unload_module(&self, name: &str) -> Result<()> {
        let module_name = display_name(name);
        let mut txn = self.begin("unload")?;
        let state = &mut *txn;

        let index = state
            .modules
            .iter()
            .position(|m| m.is_named(module_name))
            .ok_or_else(|| HdlError::NotFound(module_name.to_string()))?;

        let module = &state.modules[index];
        if module.is_protected() {
            return Err(HdlError::ProtectedModule(module.name.clone()));
        }
        for binding in &module.devices {
            if let Some(device) = self.devices.device_using(&binding.handler) {
                return Err(HdlError::DeviceBound {
                    module: module.name.clone(),
                    device,
                });
            }
        }
        if let Err(status) = module.hooks.finalize() {
            return Err(HdlError::FinalizeRejected {
                module: module.name.clone(),
                status,
            });
        }

        let mut record = state.modules.remove(index);
        let instructions = std::mem::take(&mut record.instructions);
        for binding in instructions.iter().rev() {
            let others = state
                .modules
                .iter_mut()
                .flat_map(|m| m.instructions.iter_mut());
            dispatch::unpatch(&mut *state.dispatch, binding, others);
        }
        debug!(
            module = %record.name,
            entries = record.entries.len(),
            devices = record.devices.len(),
            instructions = instructions.len(),
            "Module unlinked"
        );
        if state
            .type_equates
            .as_ref()
            .is_some_and(|(owner, _)| record.is_named(owner))
        {
            debug!(module = %record.name, "Removing device type equate function");
            state.type_equates = None;
        }
        drop(instructions);
        drop(record);

        Self::refresh_bindings(state);
        Ok(())
    }

    /// Resolve an entry point by name. Placeholders count as a reference
    /// but resolve to `NotFound`.
    pub fn find_entry_point(&self, name: &str) -> Result<EntryAddress> {
        let mut txn = self.begin("resolve")?;
        resolver::resolve(&mut txn.modules, name)
            .ok_or_else(|| HdlError::NotFound(name.to_string()))
    }

    /// The entry point shadowed by the one at `previous`.
    pub fn find_next_entry_point(&self, previous: EntryAddress) -> Result<EntryAddress> {
        let txn = self.begin("resolve")?;
        resolver::resolve_next(&txn.modules, previous)
            .ok_or_else(|| HdlError::NotFound(previous.to_string()))
    }

    /// Owner and current state of an entry point, without counting a reference.
    pub fn entry_point(&self, name: &str) -> Result<Option<(String, EntryPoint)>> {
        let txn = self.begin("inspect")?;
        Ok(resolver::find_entry(&txn.modules, name)
            .map(|(owner, entry)| (owner.to_string(), entry.clone())))
    }

    /// Handler for a device type, loading a device module if needed.
    ///
    /// On a miss the derived module (`<prefix><type>`) is loaded quietly. If
    /// that does not produce a handler and a type equate function is set, the
    /// module derived from the equated type is tried as well.
    pub fn lookup_device_handler(&self, device_type: &str) -> Result<DeviceHandlerRef> {
        if let Some(handler) = self.find_device_handler(device_type)? {
            return Ok(handler);
        }

        let module = self.config.read().device_module_name(device_type);
        let loaded = self.load(&module, LoadOptions::new().quiet()).is_ok();

        if !loaded || self.find_device_handler(device_type)?.is_none() {
            let equates = self
                .begin("lookup")?
                .type_equates
                .as_ref()
                .map(|(_, equates)| Arc::clone(equates));
            if let Some(alias) = equates.and_then(|equates| equates(device_type)) {
                let module = self.config.read().device_module_name(&alias);
                debug!(device_type, alias = %alias, module = %module, "Trying equated device module");
                let _ = self.load(&module, LoadOptions::new().quiet());
            }
        }

        self.find_device_handler(device_type)?
            .ok_or_else(|| HdlError::NotFound(device_type.to_string()))
    }

    /// Handler for a device type among loaded modules only.
    pub fn find_device_handler(&self, device_type: &str) -> Result<Option<DeviceHandlerRef>> {
        let txn = self.begin("lookup")?;
        Ok(device::find_handler(&txn.modules, device_type))
    }

    /// Install the device type equate function on behalf of the core module.
    pub fn set_device_type_equates(&self, equates: TypeEquateFn) -> Result<()> {
        let mut txn = self.begin("equates")?;
        if let Some((owner, _)) = txn.type_equates.as_ref() {
            warn!(previous = %owner, "Replacing device type equate function");
        }
        txn.type_equates = Some((CORE_MODULE_NAME.to_string(), equates));
        Ok(())
    }

    /// Snapshot of the chain for display.
    pub fn list(&self, scope: ListScope) -> Result<ModuleListing> {
        let txn = self.begin("list")?;
        Ok(ModuleListing::capture(&txn.modules, scope))
    }

    /// Dependency records in declaration order.
    pub fn list_dependencies(&self) -> Result<Vec<DependencyRecord>> {
        let txn = self.begin("list")?;
        Ok(txn.ledger.records().to_vec())
    }

    /// Module names, head first.
    pub fn module_names(&self) -> Result<Vec<String>> {
        let txn = self.begin("list")?;
        Ok(txn.modules.iter().map(|m| m.name.clone()).collect())
    }

    pub fn module_flags(&self, name: &str) -> Result<ModuleFlags> {
        let txn = self.begin("list")?;
        txn.modules
            .iter()
            .find(|m| m.is_named(display_name(name)))
            .map(|m| m.flags)
            .ok_or_else(|| HdlError::NotFound(name.to_string()))
    }

    /// Current contents of a dispatch table slot.
    pub fn dispatch_entry(&self, mode: ArchMode, opcode: u16) -> Result<Option<EntryAddress>> {
        let txn = self.begin("dispatch")?;
        Ok(txn.dispatch.get(mode, Opcode::normalize(opcode)))
    }

    /// Change the module search path.
    pub fn set_search_path(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.config.write().module_path = path.to_path_buf();
        info!("Loadable module directory is {}", path.display());
    }

    pub fn search_path(&self) -> PathBuf {
        self.config.read().module_path.clone()
    }

    pub fn config(&self) -> LoaderConfig {
        self.config.read().clone()
    }

    /// Run every module's finalize hook in chain order. Vetoes are ignored.
    pub fn terminate(&self) {
        let txn = match self.begin("terminate") {
            Ok(txn) => txn,
            Err(e) => {
                warn!(code = e.code(), "{}", e);
                return;
            }
        };

        info!("Begin termination sequence");
        for module in txn.modules.iter() {
            info!(module = %module.name, "Calling module cleanup routine");
            if let Err(status) = module.hooks.finalize() {
                debug!(module = %module.name, status, "Cleanup routine returned non-zero status");
            }
            info!(module = %module.name, "Module cleanup complete");
        }
        info!("Termination sequence complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_module::CoreModule;
    use crate::module::StaticOpener;

    fn start(opener: StaticOpener) -> (Arc<ModuleRegistry>, ShutdownSequencer) {
        let shutdown = ShutdownSequencer::new();
        let config = LoaderConfig::default()
            .with_module_path("")
            .with_module_suffix("")
            .with_preload(Vec::new());
        let registry = ModuleRegistry::builder(config)
            .opener(Arc::new(opener))
            .start(Arc::new(CoreModule::new()), &shutdown)
            .unwrap();
        (registry, shutdown)
    }

    #[test]
    fn test_core_module_linked() {
        let (registry, shutdown) = start(StaticOpener::new());
        assert_eq!(registry.module_names().unwrap(), vec![CORE_MODULE_NAME]);
        let flags = registry.module_flags(CORE_MODULE_NAME).unwrap();
        assert!(flags.contains(ModuleFlags::MAIN | ModuleFlags::NO_UNLOAD));
        assert_eq!(shutdown.pending(), vec![TERMINATION_CALL]);
        assert!(!registry.list_dependencies().unwrap().is_empty());
    }

    #[test]
    fn test_core_module_protected() {
        let (registry, _shutdown) = start(StaticOpener::new());
        assert_eq!(
            registry.unload(CORE_MODULE_NAME),
            Err(HdlError::ProtectedModule(CORE_MODULE_NAME.to_string()))
        );
    }

    #[test]
    fn test_open_error_and_not_found() {
        let (registry, _shutdown) = start(StaticOpener::new());
        let err = registry.load("nothere", LoadOptions::new()).unwrap_err();
        assert!(matches!(err, HdlError::OpenError { .. }));
        assert_eq!(
            registry.unload("nothere"),
            Err(HdlError::NotFound("nothere".to_string()))
        );
    }

    #[test]
    fn test_no_dependency_section() {
        let opener =
            StaticOpener::new().with_module("bare", || StaticModule::without_hooks("bare"));
        let (registry, _shutdown) = start(opener);
        assert_eq!(
            registry.load("bare", LoadOptions::new()),
            Err(HdlError::NoDependencySection("bare".to_string()))
        );
    }

    #[test]
    fn test_search_path_change() {
        let (registry, _shutdown) = start(StaticOpener::new());
        registry.set_search_path("/opt/hercules");
        assert_eq!(registry.search_path(), PathBuf::from("/opt/hercules"));
    }
}
