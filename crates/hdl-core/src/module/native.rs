//! Native module opener using libloading.
//!
//! A native module is a shared library exporting a [`ModuleDescriptor`]
//! under [`DESCRIPTOR_SYMBOL`]. The descriptor carries the module's identity
//! and a constructor for its hooks; [`export_module!`](crate::export_module)
//! generates both.

use std::ffi::c_void;
use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use tracing::{debug, warn};

use super::{EntryAddress, ModuleHooks, ModuleIdentity, ModuleImage, ModuleOpener};

/// Current module ABI version.
pub const MODULE_ABI_VERSION: u32 = 1;

/// Name of the exported descriptor.
pub const DESCRIPTOR_SYMBOL: &[u8] = b"hdl_module_descriptor";

/// Creates the module's hooks. Returns a `Box<Arc<dyn ModuleHooks>>` turned
/// into a raw pointer.
pub type ModuleCreateFn = unsafe extern "C" fn() -> *mut c_void;

/// Descriptor every native module exports.
#[repr(C)]
pub struct ModuleDescriptor {
    /// Should match [`MODULE_ABI_VERSION`]
    pub abi_version: u32,

    /// Module identity
    pub identity: *const u8,

    /// Identity length
    pub identity_len: usize,

    /// Hook constructor
    pub create: ModuleCreateFn,
}

// The descriptor only points at static data inside the library.
unsafe impl Sync for ModuleDescriptor {}

impl ModuleDescriptor {
    /// The identity string, `None` if the descriptor carries no identity.
    pub fn identity(&self) -> Option<ModuleIdentity> {
        if self.identity.is_null() {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(self.identity, self.identity_len) };
        Some(ModuleIdentity::new(String::from_utf8_lossy(bytes)))
    }
}

struct NativeImage {
    hooks: Option<Arc<dyn ModuleHooks>>,
    identity: ModuleIdentity,
    library: Library,
}

impl ModuleImage for NativeImage {
    fn identity(&self) -> ModuleIdentity {
        self.identity.clone()
    }

    fn hooks(&self) -> Option<Arc<dyn ModuleHooks>> {
        self.hooks.clone()
    }

    fn symbol(&self, name: &str) -> Option<EntryAddress> {
        let symbol = unsafe { self.library.get::<*const c_void>(name.as_bytes()).ok()? };
        let address = *symbol as usize;
        (address != 0).then(|| EntryAddress::new(address))
    }
}

/// Opens modules with the host's dynamic loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeModuleOpener;

impl NativeModuleOpener {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleOpener for NativeModuleOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleImage>, String> {
        let library = unsafe { Library::new(path) }.map_err(|e| e.to_string())?;

        let descriptor = unsafe {
            library
                .get::<*const ModuleDescriptor>(DESCRIPTOR_SYMBOL)
                .ok()
                .map(|symbol| *symbol)
                .filter(|ptr| !ptr.is_null())
        };

        let found = descriptor.and_then(|ptr| {
            let descriptor = unsafe { &*ptr };
            descriptor.identity().map(|identity| (descriptor, identity))
        });

        let Some((descriptor, identity)) = found else {
            debug!(path = %path.display(), "No module descriptor exported");
            return Ok(Box::new(NativeImage {
                hooks: None,
                identity: ModuleIdentity::new(path.display().to_string()),
                library,
            }));
        };

        if descriptor.abi_version != MODULE_ABI_VERSION {
            warn!(
                path = %path.display(),
                found = descriptor.abi_version,
                expected = MODULE_ABI_VERSION,
                "Module ABI version mismatch"
            );
            return Ok(Box::new(NativeImage {
                hooks: None,
                identity,
                library,
            }));
        }

        let raw = unsafe { (descriptor.create)() };
        if raw.is_null() {
            return Err("module constructor returned null".to_string());
        }
        let hooks = unsafe { *Box::from_raw(raw as *mut Arc<dyn ModuleHooks>) };

        Ok(Box::new(NativeImage {
            hooks: Some(hooks),
            identity,
            library,
        }))
    }
}

/// Export a module descriptor from a `cdylib`.
///
/// # Example
///
/// ```ignore
/// use hdl_core::module::{DependencyContext, ModuleHooks};
///
/// #[derive(Default)]
/// struct Tape3420;
///
/// impl ModuleHooks for Tape3420 {
///     fn dependencies(&self, deps: &mut DependencyContext<'_>) {
///         deps.depend("DEVBLK", "3.0", 4096);
///     }
/// }
///
/// hdl_core::export_module! {
///     identity: "hdt3420",
///     hooks: Tape3420::default(),
/// }
/// ```
#[macro_export]
macro_rules! export_module {
    (
        identity: $identity:literal,
        hooks: $hooks:expr $(,)?
    ) => {
        #[doc(hidden)]
        pub extern "C" fn __hdl_module_create() -> *mut ::std::ffi::c_void {
            let hooks: ::std::sync::Arc<dyn $crate::module::ModuleHooks> =
                ::std::sync::Arc::new($hooks);
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(hooks)) as *mut ::std::ffi::c_void
        }

        /// Export the module descriptor.
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static hdl_module_descriptor: $crate::module::ModuleDescriptor =
            $crate::module::ModuleDescriptor {
                abi_version: $crate::module::MODULE_ABI_VERSION,
                identity: concat!($identity, "\0").as_ptr(),
                identity_len: concat!($identity, "\0").len() - 1,
                create: __hdl_module_create,
            };
    };
}
