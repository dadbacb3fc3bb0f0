//! Procedure records.

use bitflags::bitflags;

use crate::icode::Icode;
use crate::locals::LocalIdTable;
use crate::types::{HlType, RegisterSet};

bitflags! {
    /// Procedure classification flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcFlags: u32 {
        /// Identified as a library function; replaced, not decompiled.
        const IS_LIB = 1;
        /// Returns a value.
        const IS_FUNC = 1 << 1;
        /// Variadic.
        const VARARG = 1 << 2;
        /// A compiler runtime helper: known name, but decompiled normally.
        const RUNTIME = 1 << 3;
    }
}

/// One discovered procedure: entry state, recovered interface, and the
/// icode the disassembler produced for it. The icode is exclusively owned;
/// the image is shared read-only with every other procedure.
#[derive(Debug, Clone)]
pub struct Procedure {
    /// Image offset of the entry point.
    pub entry: u32,
    /// Resolved name; empty until identification.
    pub name: String,
    /// Classification flags.
    pub flags: ProcFlags,
    /// Typed argument slots.
    pub args: Vec<HlType>,
    /// Return-value type.
    pub ret: HlType,
    /// Registers live on exit.
    pub live_out: RegisterSet,
    /// Linear intermediate code.
    pub icode: Vec<Icode>,
    /// Long local identifiers.
    pub locals: LocalIdTable,
}

impl Procedure {
    /// A fresh, unidentified procedure at the given entry offset.
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            name: String::new(),
            flags: ProcFlags::empty(),
            args: Vec::new(),
            ret: HlType::Unknown,
            live_out: RegisterSet::empty(),
            icode: Vec::new(),
            locals: LocalIdTable::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_procedure_is_unclassified() {
        let proc = Procedure::new(0x1A0);
        assert_eq!(proc.entry, 0x1A0);
        assert!(proc.name.is_empty());
        assert!(proc.flags.is_empty());
        assert_eq!(proc.ret, HlType::Unknown);
        assert!(proc.live_out.is_empty());
    }
}
