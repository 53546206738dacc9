//! Device handler registry types.

use std::ops::Deref;
use std::sync::Arc;

use crate::module::ModuleRecord;

/// A device handler table supplied by a module.
pub trait DeviceHandler: Send + Sync {
    /// Short description for listings.
    fn describe(&self) -> &str {
        ""
    }
}

/// Shared handle to a [`DeviceHandler`]. Equality is identity.
#[derive(Clone)]
pub struct DeviceHandlerRef(Arc<dyn DeviceHandler>);

impl DeviceHandlerRef {
    pub fn new(handler: impl DeviceHandler + 'static) -> Self {
        Self(Arc::new(handler))
    }

    pub fn from_arc(handler: Arc<dyn DeviceHandler>) -> Self {
        Self(handler)
    }

    /// Whether both handles point at the same handler table.
    pub fn ptr_eq(&self, other: &DeviceHandlerRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl Deref for DeviceHandlerRef {
    type Target = dyn DeviceHandler;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl std::fmt::Debug for DeviceHandlerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DeviceHandlerRef")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Reports which configured device, if any, currently uses a handler.
///
/// Consulted before unloading a module.
pub trait DeviceActivity: Send + Sync {
    fn device_using(&self, handler: &DeviceHandlerRef) -> Option<u16>;
}

/// No configured devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDevices;

impl DeviceActivity for NoDevices {
    fn device_using(&self, _handler: &DeviceHandlerRef) -> Option<u16> {
        None
    }
}

/// Maps a device type name to an equivalent type name.
pub type TypeEquateFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// First handler for `device_type` in chain order, case-insensitive.
pub fn find_handler(modules: &[ModuleRecord], device_type: &str) -> Option<DeviceHandlerRef> {
    modules
        .iter()
        .flat_map(|module| module.devices.iter())
        .find(|binding| binding.device_type.eq_ignore_ascii_case(device_type))
        .map(|binding| binding.handler.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tape;
    impl DeviceHandler for Tape {
        fn describe(&self) -> &str {
            "tape"
        }
    }

    #[test]
    fn test_handler_identity() {
        let a = DeviceHandlerRef::new(Tape);
        let b = a.clone();
        let c = DeviceHandlerRef::new(Tape);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.describe(), "tape");
        assert_eq!(NoDevices.device_using(&a), None);
    }
}
