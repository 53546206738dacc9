//! Opcode dispatch patching.
//!
//! The emulator's instruction tables are modelled as one mapping from
//! (architecture mode, opcode) to an implementation slot. A module that
//! registers an instruction patches that slot and keeps the value it
//! replaced, so unloading the module puts the previous routine back.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::module::EntryAddress;

/// Architecture mode of a dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ArchMode {
    S370,
    Esa390,
    ZArch,
}

impl ArchMode {
    pub const ALL: [ArchMode; 3] = [ArchMode::S370, ArchMode::Esa390, ArchMode::ZArch];

    /// Display name used in listings.
    pub fn name(self) -> &'static str {
        match self {
            ArchMode::S370 => "S/370",
            ArchMode::Esa390 => "ESA/390",
            ArchMode::ZArch => "z/Arch",
        }
    }

    /// Symbol prefix of per-architecture routines.
    pub fn symbol_prefix(self) -> &'static str {
        match self {
            ArchMode::S370 => "s370_",
            ArchMode::Esa390 => "s390_",
            ArchMode::ZArch => "z900_",
        }
    }

    pub fn flag(self) -> ArchFlags {
        match self {
            ArchMode::S370 => ArchFlags::S370,
            ArchMode::Esa390 => ArchFlags::ESA390,
            ArchMode::ZArch => ArchFlags::ZARCH,
        }
    }
}

impl fmt::Display for ArchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// Architecture modes an instruction is registered for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ArchFlags: u32 {
        const S370 = 1 << 0;
        const ESA390 = 1 << 1;
        const ZARCH = 1 << 2;
    }
}

impl ArchFlags {
    /// Modes set in these flags, in table order.
    pub fn modes(self) -> impl Iterator<Item = ArchMode> {
        ArchMode::ALL
            .into_iter()
            .filter(move |mode| self.contains(mode.flag()))
    }
}

/// A normalized operation code.
///
/// One-byte opcodes live in the high byte; two-byte opcodes are kept as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Opcode(u16);

impl Opcode {
    pub fn normalize(raw: u16) -> Self {
        if raw > 0xff {
            Opcode(raw)
        } else {
            Opcode(raw << 8)
        }
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// The dispatch tables the loader patches.
///
/// `None` means the slot holds the emulator's default routine.
pub trait OpcodeTable: Send {
    fn get(&self, mode: ArchMode, opcode: Opcode) -> Option<EntryAddress>;

    fn set(&mut self, mode: ArchMode, opcode: Opcode, routine: Option<EntryAddress>);

    /// Rebuild any derived copies of the tables used by hot paths.
    fn refresh_shadows(&mut self) {}
}

/// In-memory dispatch table.
#[derive(Debug, Default, Clone)]
pub struct DispatchTable {
    slots: HashMap<(ArchMode, Opcode), EntryAddress>,
    generation: u64,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: preset a slot.
    pub fn with_entry(mut self, mode: ArchMode, opcode: u16, routine: EntryAddress) -> Self {
        self.slots.insert((mode, Opcode::normalize(opcode)), routine);
        self
    }

    /// Number of shadow refreshes performed so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl OpcodeTable for DispatchTable {
    fn get(&self, mode: ArchMode, opcode: Opcode) -> Option<EntryAddress> {
        self.slots.get(&(mode, opcode)).copied()
    }

    fn set(&mut self, mode: ArchMode, opcode: Opcode, routine: Option<EntryAddress>) {
        match routine {
            Some(routine) => {
                self.slots.insert((mode, opcode), routine);
            }
            None => {
                self.slots.remove(&(mode, opcode));
            }
        }
    }

    fn refresh_shadows(&mut self) {
        self.generation += 1;
    }
}

/// An instruction registered by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionBinding {
    pub name: String,
    pub opcode: Opcode,
    pub arch: ArchFlags,
    pub routine: EntryAddress,
    /// Slot contents before this binding patched them, per mode
    saved: Vec<(ArchMode, Option<EntryAddress>)>,
}

impl InstructionBinding {
    /// The value this binding replaced in `mode`'s table.
    pub fn saved_original(&self, mode: ArchMode) -> Option<Option<EntryAddress>> {
        self.saved
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, routine)| *routine)
    }

    fn replace_saved(&mut self, mode: ArchMode, routine: Option<EntryAddress>) {
        if let Some(slot) = self.saved.iter_mut().find(|(m, _)| *m == mode) {
            slot.1 = routine;
        }
    }
}

/// Create a binding and patch it into every mode it names.
pub fn patch(
    table: &mut dyn OpcodeTable,
    arch: ArchFlags,
    opcode: u16,
    name: &str,
    routine: EntryAddress,
) -> InstructionBinding {
    let opcode = Opcode::normalize(opcode);
    let mut saved = Vec::new();
    for mode in arch.modes() {
        saved.push((mode, table.get(mode, opcode)));
        table.set(mode, opcode, Some(routine));
    }
    table.refresh_shadows();

    InstructionBinding {
        name: name.to_string(),
        opcode,
        arch,
        routine,
        saved,
    }
}

/// Undo a binding's patch.
///
/// If the slot still holds this binding's routine the saved value goes back
/// into the table. If a later binding sits on top of it, that binding
/// inherits the saved value instead, so the chain of patches stays intact.
pub fn unpatch<'a>(
    table: &mut dyn OpcodeTable,
    binding: &InstructionBinding,
    others: impl IntoIterator<Item = &'a mut InstructionBinding>,
) {
    let mut others: Vec<&mut InstructionBinding> = others
        .into_iter()
        .filter(|other| other.opcode == binding.opcode)
        .collect();

    for &(mode, saved) in binding.saved.iter().rev() {
        if table.get(mode, binding.opcode) == Some(binding.routine) {
            table.set(mode, binding.opcode, saved);
            continue;
        }
        if let Some(above) = others
            .iter_mut()
            .find(|other| other.saved_original(mode) == Some(Some(binding.routine)))
        {
            above.replace_saved(mode, saved);
        }
    }
    table.refresh_shadows();
}
