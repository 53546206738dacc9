//! Hercules dynamic loader.
//!
//! Loads modules that extend or override the emulator's instruction set,
//! device handlers and cryptographic facility at runtime:
//!
//! - [`registry`]: module load/unload transactions under the loader lock
//! - [`ledger`]: dependency records shared by the core and its modules
//! - [`resolver`]: entry point lookup and override chaining
//! - [`device`]: device-type handler bindings
//! - [`dispatch`]: opcode dispatch patching
//! - [`shutdown`]: ordered shutdown calls
//!
//! ```ignore
//! use std::sync::Arc;
//! use hdl_core::{CoreModule, LoadOptions, LoaderConfig, ModuleRegistry, ShutdownSequencer};
//!
//! let shutdown = ShutdownSequencer::new();
//! let registry = ModuleRegistry::builder(LoaderConfig::default().apply_env())
//!     .start(Arc::new(CoreModule::new()), &shutdown)?;
//! registry.load("hdt3420", LoadOptions::new())?;
//! shutdown.run_all();
//! ```

pub mod config;
pub mod core_module;
pub mod crypto;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod listing;
pub mod module;
pub mod registry;
pub mod resolver;
pub mod shutdown;

pub use config::{LoadOptions, LoaderConfig, PreloadEntry};
pub use core_module::{CoreModule, CORE_MODULE_NAME};
pub use crypto::CryptoFacility;
pub use device::{DeviceActivity, DeviceHandler, DeviceHandlerRef, NoDevices, TypeEquateFn};
pub use dispatch::{ArchFlags, ArchMode, DispatchTable, InstructionBinding, Opcode, OpcodeTable};
pub use error::{DependencyMismatch, HdlError, Result};
pub use ledger::{DependencyLedger, DependencyRecord};
pub use listing::{ListItem, ListScope, ModuleListing, ModuleSummary};
pub use module::{
    EntryAddress, ModuleFlags, ModuleHooks, ModuleIdentity, ModuleImage, ModuleOpener,
    NativeModuleOpener, StaticModule, StaticOpener,
};
pub use registry::{ModuleRegistry, RegistryBuilder, TERMINATION_CALL};
pub use shutdown::{ShutdownCallback, ShutdownSequencer};
