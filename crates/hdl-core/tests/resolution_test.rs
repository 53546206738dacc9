//! Entry point resolution tests.

mod common;

use std::sync::Arc;

use common::{install_as, Harness, ScriptedModule};
use hdl_core::crypto::{arch_symbol, MSA_FUNCTIONS};
use hdl_core::module::ResolveContext;
use hdl_core::{ArchMode, CoreModule, EntryAddress, HdlError, ListScope, LoadOptions};

#[test]
fn test_override_chain() {
    let h = Harness::start();
    h.install("a", ScriptedModule::new("a").entry("X", 0xa0));
    h.install("b", ScriptedModule::new("b").entry("X", 0xb0));

    h.registry.load("a", LoadOptions::new()).unwrap();
    h.registry.load("b", LoadOptions::new()).unwrap();

    let b = h.registry.find_entry_point("X").unwrap();
    assert_eq!(b, EntryAddress::new(0xb0));

    let a = h.registry.find_next_entry_point(b).unwrap();
    assert_eq!(a, EntryAddress::new(0xa0));

    assert!(matches!(
        h.registry.find_next_entry_point(a),
        Err(HdlError::NotFound(_))
    ));
}

#[test]
fn test_unload_uncovers_overridden_entry() {
    let h = Harness::start();
    h.install("a", ScriptedModule::new("a").entry("X", 0xa0));
    h.install("b", ScriptedModule::new("b").entry("X", 0xb0));
    h.registry.load("a", LoadOptions::new()).unwrap();
    h.registry.load("b", LoadOptions::new()).unwrap();

    h.registry.unload("b").unwrap();
    assert_eq!(
        h.registry.find_entry_point("X"),
        Ok(EntryAddress::new(0xa0))
    );
}

#[test]
fn test_raw_symbol_resolution_is_cached() {
    let h = Harness::start();
    install_as(
        &h.opener,
        "hdt1403",
        "hdt1403",
        ScriptedModule::new("hdt1403"),
        &[("hdt1403_print", 0x1403)],
    );
    h.registry.load("hdt1403", LoadOptions::new()).unwrap();

    assert_eq!(h.registry.entry_point("hdt1403_print").unwrap(), None);
    assert_eq!(
        h.registry.find_entry_point("hdt1403_print"),
        Ok(EntryAddress::new(0x1403))
    );

    let (owner, entry) = h.registry.entry_point("hdt1403_print").unwrap().unwrap();
    assert_eq!(owner, "hdt1403");
    assert_eq!(entry.load_count, 1);

    h.registry.find_entry_point("hdt1403_print").unwrap();
    let (_, entry) = h.registry.entry_point("hdt1403_print").unwrap().unwrap();
    assert_eq!(entry.load_count, 2);
}

#[test]
fn test_unresolvable_name() {
    let h = Harness::start();
    assert_eq!(
        h.registry.find_entry_point("nothing_exports_this"),
        Err(HdlError::NotFound("nothing_exports_this".to_string()))
    );
}

#[test]
fn test_placeholder_entries() {
    let h = Harness::start_with(
        CoreModule::new()
            .with_entry("panel_display", EntryAddress::new(0x77))
            .with_placeholder("debug_cpu_state"),
    );

    assert!(h.registry.find_entry_point("debug_cpu_state").is_err());
    let (owner, entry) = h.registry.entry_point("debug_cpu_state").unwrap().unwrap();
    assert_eq!(owner, hdl_core::CORE_MODULE_NAME);
    assert_eq!(entry.address, None);
    assert_eq!(entry.load_count, 1);

    let named: Vec<String> = h
        .registry
        .list(ListScope::Named)
        .unwrap()
        .iter()
        .map(|item| item.to_string())
        .collect();
    assert!(named.iter().any(|l| l.contains("panel_display")));
    assert!(!named.iter().any(|l| l.contains("debug_cpu_state")));

    let all: Vec<String> = h
        .registry
        .list(ListScope::All)
        .unwrap()
        .iter()
        .map(|item| item.to_string())
        .collect();
    assert!(all
        .iter()
        .any(|l| l.contains("symbol = debug_cpu_state, unresolved")));
}

#[test]
fn test_crypto_facility_follows_dyncrypt() {
    let h = Harness::start();
    let symbols: Vec<(String, usize)> = ArchMode::ALL
        .into_iter()
        .flat_map(|mode| MSA_FUNCTIONS.into_iter().map(move |f| arch_symbol(mode, f)))
        .enumerate()
        .map(|(i, name)| (name, 0x9000 + i))
        .collect();
    let symbols: Vec<(&str, usize)> = symbols.iter().map(|(n, a)| (n.as_str(), *a)).collect();
    install_as(
        &h.opener,
        "dyncrypt",
        "dyncrypt",
        ScriptedModule::new("dyncrypt"),
        &symbols,
    );

    assert!(!h.crypto.is_installed());
    h.registry.load("dyncrypt", LoadOptions::new()).unwrap();

    assert!(h.crypto.is_installed());
    assert_eq!(
        h.crypto.get(ArchMode::S370, "cipher_message"),
        Some(EntryAddress::new(0x9000))
    );
    assert_eq!(
        h.crypto.get(ArchMode::ZArch, "perform_cryptographic_key_management_operation"),
        Some(EntryAddress::new(0x9000 + 29))
    );

    h.registry.unload("dyncrypt").unwrap();
    assert!(!h.crypto.is_installed());
    assert_eq!(h.crypto.get(ArchMode::S370, "cipher_message"), None);
}

#[test]
fn test_module_resolver_sees_later_modules() {
    let h = Harness::start();
    let found = Arc::new(parking_lot::Mutex::new(None));
    let slot = found.clone();

    h.install(
        "consumer",
        ScriptedModule::new("consumer").resolving(Arc::new(move |ctx: &mut ResolveContext<'_>| {
            *slot.lock() = ctx.resolve("provider_service");
        })),
    );
    h.install(
        "provider",
        ScriptedModule::new("provider").entry("provider_service", 0x4242),
    );

    h.registry.load("consumer", LoadOptions::new()).unwrap();
    assert_eq!(*found.lock(), None);

    h.registry.load("provider", LoadOptions::new()).unwrap();
    assert_eq!(*found.lock(), Some(EntryAddress::new(0x4242)));

    let (_, entry) = h.registry.entry_point("provider_service").unwrap().unwrap();
    assert_eq!(entry.load_count, 1);

    h.registry.unload("provider").unwrap();
    assert_eq!(*found.lock(), None);
}
