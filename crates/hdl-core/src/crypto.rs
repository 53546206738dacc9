//! Message-security-assist entry points.
//!
//! The emulator core calls the cryptographic instructions through these
//! names. Each one exists per architecture mode with that mode's symbol
//! prefix, and is bound to whichever module currently exports it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::dispatch::ArchMode;
use crate::module::{EntryAddress, ResolveContext};

/// The message-security-assist functions, without architecture prefix.
pub const MSA_FUNCTIONS: [&str; 10] = [
    "cipher_message",
    "cipher_message_with_chaining",
    "cipher_message_with_cipher_feedback",
    "cipher_message_with_counter",
    "cipher_message_with_output_feedback",
    "compute_intermediate_message_digest",
    "compute_last_message_digest",
    "compute_message_authentication_code",
    "perform_cryptographic_computation",
    "perform_cryptographic_key_management_operation",
];

/// Symbol name of `function` in `mode`, e.g. `z900_cipher_message`.
pub fn arch_symbol(mode: ArchMode, function: &str) -> String {
    format!("{}{}", mode.symbol_prefix(), function)
}

/// Current bindings of the cryptographic facility.
#[derive(Debug, Default)]
pub struct CryptoFacility {
    bindings: Mutex<HashMap<(ArchMode, &'static str), EntryAddress>>,
}

impl CryptoFacility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebind every function against the current module chain.
    pub fn resolve(&self, ctx: &mut ResolveContext<'_>) {
        let mut bindings = self.bindings.lock();
        bindings.clear();
        for mode in ArchMode::ALL {
            for function in MSA_FUNCTIONS {
                if let Some(address) = ctx.resolve(&arch_symbol(mode, function)) {
                    bindings.insert((mode, function), address);
                }
            }
        }
        debug!(bound = bindings.len(), "Resolved cryptographic facility");
    }

    /// Address currently bound to `function` in `mode`.
    pub fn get(&self, mode: ArchMode, function: &str) -> Option<EntryAddress> {
        self.bindings
            .lock()
            .iter()
            .find(|((m, f), _)| *m == mode && *f == function)
            .map(|(_, address)| *address)
    }

    /// Whether any function is bound.
    pub fn is_installed(&self) -> bool {
        !self.bindings.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_symbol() {
        assert_eq!(arch_symbol(ArchMode::S370, "cipher_message"), "s370_cipher_message");
        assert_eq!(
            arch_symbol(ArchMode::ZArch, MSA_FUNCTIONS[9]),
            "z900_perform_cryptographic_key_management_operation"
        );
        assert_eq!(MSA_FUNCTIONS.len(), 10);
    }

    #[test]
    fn test_empty_facility() {
        let facility = CryptoFacility::new();
        assert!(!facility.is_installed());
        assert_eq!(facility.get(ArchMode::Esa390, "cipher_message"), None);
    }
}
