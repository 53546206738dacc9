//! Diagnostic listing of the module chain.
//!
//! A [`ModuleListing`] is a snapshot taken under the loader lock. Iterating
//! it has no side effects and can be repeated.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dispatch::{ArchMode, Opcode};
use crate::module::{EntryAddress, ModuleFlags, ModuleRecord};

/// Which entry points a listing shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListScope {
    /// Every entry point, placeholders included.
    All,
    /// Hides the core module's placeholder slots.
    #[default]
    Named,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub name: String,
    pub address: Option<EntryAddress>,
    pub load_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructionSummary {
    pub name: String,
    pub opcode: Opcode,
    pub modes: Vec<ArchMode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub name: String,
    pub main: bool,
    pub no_unload: bool,
    pub forced: bool,
    pub loaded_at: DateTime<Utc>,
    pub entries: Vec<EntrySummary>,
    pub devices: Vec<String>,
    pub instructions: Vec<InstructionSummary>,
}

impl ModuleSummary {
    fn capture(module: &ModuleRecord, scope: ListScope) -> Self {
        let hide_placeholders = scope == ListScope::Named && module.is_main();
        Self {
            name: module.name.clone(),
            main: module.is_main(),
            no_unload: module.flags.contains(ModuleFlags::NO_UNLOAD),
            forced: module.flags.contains(ModuleFlags::WAS_FORCED),
            loaded_at: module.loaded_at,
            entries: module
                .entries
                .iter()
                .filter(|e| !(hide_placeholders && e.address.is_none()))
                .map(|e| EntrySummary {
                    name: e.name.clone(),
                    address: e.address,
                    load_count: e.load_count,
                })
                .collect(),
            devices: module
                .devices
                .iter()
                .map(|d| d.device_type.clone())
                .collect(),
            instructions: module
                .instructions
                .iter()
                .map(|i| InstructionSummary {
                    name: i.name.clone(),
                    opcode: i.opcode,
                    modes: i.arch.modes().collect(),
                })
                .collect(),
        }
    }
}

/// Snapshot of the module chain, head first.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct ModuleListing {
    modules: Vec<ModuleSummary>,
}

impl ModuleListing {
    pub(crate) fn capture(modules: &[ModuleRecord], scope: ListScope) -> Self {
        Self {
            modules: modules
                .iter()
                .map(|m| ModuleSummary::capture(m, scope))
                .collect(),
        }
    }

    pub fn modules(&self) -> &[ModuleSummary] {
        &self.modules
    }

    /// Listing lines in display order.
    pub fn iter(&self) -> impl Iterator<Item = ListItem<'_>> {
        self.modules.iter().flat_map(|module| {
            let entries = module.entries.iter().map(move |entry| ListItem::EntryPoint {
                entry,
                owner: &module.name,
            });
            let devices = (!module.devices.is_empty())
                .then_some(ListItem::Devices(&module.devices[..]));
            let instructions = module.instructions.iter().map(ListItem::Instruction);

            std::iter::once(ListItem::Module(module))
                .chain(entries)
                .chain(devices)
                .chain(instructions)
        })
    }
}

/// One line of a listing.
#[derive(Debug, Clone, Copy)]
pub enum ListItem<'a> {
    Module(&'a ModuleSummary),
    EntryPoint {
        entry: &'a EntrySummary,
        owner: &'a str,
    },
    Devices(&'a [String]),
    Instruction(&'a InstructionSummary),
}

impl fmt::Display for ListItem<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListItem::Module(module) => {
                let kind = if module.main { "main" } else { "load" };
                write!(f, "dll type = {}, name = {}", kind, module.name)?;
                let mut flags = Vec::new();
                if module.no_unload {
                    flags.push("nounload");
                }
                if module.forced {
                    flags.push("forced");
                }
                if !flags.is_empty() {
                    write!(f, ", flags = ({})", flags.join(", "))?;
                }
                Ok(())
            }
            ListItem::EntryPoint { entry, owner } => {
                write!(f, "  symbol = {}", entry.name)?;
                match entry.address {
                    Some(_) => write!(f, ", loadcount = {}", entry.load_count)?,
                    None => f.write_str(", unresolved")?,
                }
                write!(f, ", owner = {}", owner)
            }
            ListItem::Devices(types) => write!(f, "  devtype = {}", types.join(" ")),
            ListItem::Instruction(instruction) => {
                write!(
                    f,
                    "  instruction = {}, opcode = {}",
                    instruction.name, instruction.opcode
                )?;
                for mode in &instruction.modes {
                    write!(f, ", {}", mode)?;
                }
                Ok(())
            }
        }
    }
}
