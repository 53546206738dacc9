//! Entry point resolution across the module chain.
//!
//! Names are first looked up among entry points already known to some module
//! (bumping their load count), then as raw symbols in every module. Chain
//! order is most recently loaded first, so a later module's symbol overrides
//! an earlier one of the same name; [`resolve_next`] walks past the override
//! to the implementation it shadows.

use tracing::debug;

use crate::module::{EntryAddress, EntryPoint, ModuleRecord};

/// Resolve `name`, caching raw symbol hits as new entry points.
pub fn resolve(modules: &mut [ModuleRecord], name: &str) -> Option<EntryAddress> {
    for module in modules.iter_mut() {
        if let Some(entry) = module.entries.iter_mut().find(|e| e.name == name) {
            entry.load_count += 1;
            return entry.address;
        }
    }

    for module in modules.iter_mut() {
        if let Some(address) = module.image.symbol(name) {
            debug!(module = %module.name, symbol = name, "Resolved raw symbol");
            module.entries.insert(
                0,
                EntryPoint {
                    name: name.to_string(),
                    address: Some(address),
                    load_count: 1,
                },
            );
            return Some(address);
        }
    }

    None
}

/// The next entry point, further down the chain, with the same name as the
/// one at `previous`.
pub fn resolve_next(modules: &[ModuleRecord], previous: EntryAddress) -> Option<EntryAddress> {
    let mut remaining = modules
        .iter()
        .flat_map(|module| module.entries.iter())
        .skip_while(|entry| entry.address != Some(previous));

    let name = &remaining.next()?.name;
    remaining
        .find(|entry| &entry.name == name)
        .and_then(|entry| entry.address)
}

/// Zero every load count in the chain.
pub fn reset_load_counts(modules: &mut [ModuleRecord]) {
    for entry in modules.iter_mut().flat_map(|m| m.entries.iter_mut()) {
        entry.load_count = 0;
    }
}

/// Find an entry point record by name without touching its count.
pub fn find_entry<'a>(modules: &'a [ModuleRecord], name: &str) -> Option<(&'a str, &'a EntryPoint)> {
    modules.iter().find_map(|module| {
        module
            .entries
            .iter()
            .find(|e| e.name == name)
            .map(|entry| (module.name.as_str(), entry))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleFlags, StaticModule};
    use std::sync::Arc;

    struct Inert;

    impl crate::module::ModuleHooks for Inert {
        fn dependencies(&self, _deps: &mut crate::module::DependencyContext<'_>) {}
    }

    fn record(name: &str, symbols: &[(&str, usize)], entries: &[(&str, usize)]) -> ModuleRecord {
        let hooks: Arc<dyn crate::module::ModuleHooks> = Arc::new(Inert);
        let mut image = StaticModule::new(name, hooks.clone());
        for (symbol, address) in symbols {
            image = image.with_symbol(*symbol, EntryAddress::new(*address));
        }
        let mut record = ModuleRecord::new(name, ModuleFlags::empty(), hooks, Box::new(image));
        for (entry, address) in entries.iter().rev() {
            record.entries.insert(
                0,
                EntryPoint {
                    name: entry.to_string(),
                    address: Some(EntryAddress::new(*address)),
                    load_count: 0,
                },
            );
        }
        record
    }

    #[test]
    fn test_resolve_bumps_known_entry() {
        let mut chain = vec![record("a", &[], &[("x", 0x10)])];
        assert_eq!(resolve(&mut chain, "x"), Some(EntryAddress::new(0x10)));
        assert_eq!(resolve(&mut chain, "x"), Some(EntryAddress::new(0x10)));
        assert_eq!(chain[0].entries[0].load_count, 2);
    }

    #[test]
    fn test_resolve_caches_raw_symbol() {
        let mut chain = vec![
            record("b", &[], &[]),
            record("a", &[("sym", 0x20)], &[]),
        ];
        assert_eq!(resolve(&mut chain, "sym"), Some(EntryAddress::new(0x20)));
        assert!(chain[0].entries.is_empty());
        assert_eq!(chain[1].entries[0].name, "sym");
        assert_eq!(chain[1].entries[0].load_count, 1);

        assert_eq!(resolve(&mut chain, "missing"), None);
    }

    #[test]
    fn test_resolve_next_walks_override_chain() {
        let chain = vec![
            record("b", &[], &[("x", 0xb0)]),
            record("a", &[], &[("y", 0xa1), ("x", 0xa0)]),
            record("main", &[], &[("z", 0x01)]),
        ];
        assert_eq!(
            resolve_next(&chain, EntryAddress::new(0xb0)),
            Some(EntryAddress::new(0xa0))
        );
        assert_eq!(resolve_next(&chain, EntryAddress::new(0xa0)), None);
        assert_eq!(resolve_next(&chain, EntryAddress::new(0xdead)), None);
    }

    #[test]
    fn test_reset_load_counts() {
        let mut chain = vec![record("a", &[], &[("x", 1), ("y", 2)])];
        resolve(&mut chain, "x");
        resolve(&mut chain, "y");
        reset_load_counts(&mut chain);
        assert!(chain[0].entries.iter().all(|e| e.load_count == 0));
        let (owner, entry) = find_entry(&chain, "y").unwrap();
        assert_eq!(owner, "a");
        assert_eq!(entry.address, Some(EntryAddress::new(2)));
    }
}
