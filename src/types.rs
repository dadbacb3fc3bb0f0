//! Core types shared across the decompiler passes.
//!
//! This module defines the value types the analysis passes exchange:
//! high-level types recovered for arguments and return values, the 16-bit
//! register file with its def/use set representation, compiler provenance,
//! and the abstract machine state the startup analyzer writes into.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// High-level types attached to arguments, return values and locals.
///
/// The numeric encoding matches the prototype data file; unknown or
/// out-of-range codes decode to [`HlType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum HlType {
    /// Type not yet recovered.
    Unknown,
    /// Signed 8-bit integer.
    ByteSign,
    /// Unsigned 8-bit integer.
    ByteUnsign,
    /// Signed 16-bit integer.
    WordSign,
    /// Unsigned 16-bit integer.
    WordUnsign,
    /// Signed 32-bit integer.
    LongSign,
    /// Unsigned 32-bit integer.
    LongUnsign,
    /// Aggregate type.
    Record,
    /// Pointer.
    Ptr,
    /// String.
    Str,
    /// Constant.
    Const,
    /// 32-bit floating point.
    Float,
    /// 64-bit floating point.
    Double,
}

impl HlType {
    /// Decode a type code from a data file.
    pub fn from_u16(raw: u16) -> Self {
        match raw {
            1 => Self::ByteSign,
            2 => Self::ByteUnsign,
            3 => Self::WordSign,
            4 => Self::WordUnsign,
            5 => Self::LongSign,
            6 => Self::LongUnsign,
            7 => Self::Record,
            8 => Self::Ptr,
            9 => Self::Str,
            10 => Self::Const,
            11 => Self::Float,
            12 => Self::Double,
            _ => Self::Unknown,
        }
    }

    /// Encode back to the data-file type code.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::ByteSign => 1,
            Self::ByteUnsign => 2,
            Self::WordSign => 3,
            Self::WordUnsign => 4,
            Self::LongSign => 5,
            Self::LongUnsign => 6,
            Self::Record => 7,
            Self::Ptr => 8,
            Self::Str => 9,
            Self::Const => 10,
            Self::Float => 11,
            Self::Double => 12,
        }
    }

    /// Whether this is one of the 32-bit integer types.
    pub fn is_long(self) -> bool {
        matches!(self, Self::LongSign | Self::LongUnsign)
    }
}

/// 16-bit x86 registers, word registers first, then segment registers,
/// then the byte halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Register {
    /// Accumulator.
    Ax,
    /// Count register.
    Cx,
    /// Data register.
    Dx,
    /// Base register.
    Bx,
    /// Stack pointer.
    Sp,
    /// Base pointer.
    Bp,
    /// Source index.
    Si,
    /// Destination index.
    Di,
    /// Extra segment.
    Es,
    /// Code segment.
    Cs,
    /// Stack segment.
    Ss,
    /// Data segment.
    Ds,
    /// Low byte of AX.
    Al,
    /// Low byte of CX.
    Cl,
    /// Low byte of DX.
    Dl,
    /// Low byte of BX.
    Bl,
    /// High byte of AX.
    Ah,
    /// High byte of CX.
    Ch,
    /// High byte of DX.
    Dh,
    /// High byte of BX.
    Bh,
}

bitflags! {
    /// A set of registers, used for def/use bitmaps and live-out masks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegisterSet: u32 {
        /// AX
        const AX = 1;
        /// CX
        const CX = 1 << 1;
        /// DX
        const DX = 1 << 2;
        /// BX
        const BX = 1 << 3;
        /// SP
        const SP = 1 << 4;
        /// BP
        const BP = 1 << 5;
        /// SI
        const SI = 1 << 6;
        /// DI
        const DI = 1 << 7;
        /// ES
        const ES = 1 << 8;
        /// CS
        const CS = 1 << 9;
        /// SS
        const SS = 1 << 10;
        /// DS
        const DS = 1 << 11;
        /// AL
        const AL = 1 << 12;
        /// CL
        const CL = 1 << 13;
        /// DL
        const DL = 1 << 14;
        /// BL
        const BL = 1 << 15;
        /// AH
        const AH = 1 << 16;
        /// CH
        const CH = 1 << 17;
        /// DH
        const DH = 1 << 18;
        /// BH
        const BH = 1 << 19;
    }
}

impl Register {
    /// The singleton [`RegisterSet`] for this register.
    pub fn mask(self) -> RegisterSet {
        match self {
            Self::Ax => RegisterSet::AX,
            Self::Cx => RegisterSet::CX,
            Self::Dx => RegisterSet::DX,
            Self::Bx => RegisterSet::BX,
            Self::Sp => RegisterSet::SP,
            Self::Bp => RegisterSet::BP,
            Self::Si => RegisterSet::SI,
            Self::Di => RegisterSet::DI,
            Self::Es => RegisterSet::ES,
            Self::Cs => RegisterSet::CS,
            Self::Ss => RegisterSet::SS,
            Self::Ds => RegisterSet::DS,
            Self::Al => RegisterSet::AL,
            Self::Cl => RegisterSet::CL,
            Self::Dl => RegisterSet::DL,
            Self::Bl => RegisterSet::BL,
            Self::Ah => RegisterSet::AH,
            Self::Ch => RegisterSet::CH,
            Self::Dh => RegisterSet::DH,
            Self::Bh => RegisterSet::BH,
        }
    }

    /// Lower-case assembler name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ax => "ax",
            Self::Cx => "cx",
            Self::Dx => "dx",
            Self::Bx => "bx",
            Self::Sp => "sp",
            Self::Bp => "bp",
            Self::Si => "si",
            Self::Di => "di",
            Self::Es => "es",
            Self::Cs => "cs",
            Self::Ss => "ss",
            Self::Ds => "ds",
            Self::Al => "al",
            Self::Cl => "cl",
            Self::Dl => "dl",
            Self::Bl => "bl",
            Self::Ah => "ah",
            Self::Ch => "ch",
            Self::Dh => "dh",
            Self::Bh => "bh",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of word/segment registers tracked by [`MachineState`].
const NUM_WORD_REGS: usize = 12;

/// Abstract CPU state carried through the startup analysis.
///
/// Only the word and segment registers are tracked; a register whose value
/// has not been established reads as `None`.
#[derive(Debug, Clone, Default)]
pub struct MachineState {
    regs: [Option<u16>; NUM_WORD_REGS],
}

impl MachineState {
    /// Fresh state with no register values established.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a register value. Byte registers are not tracked.
    pub fn set_reg(&mut self, reg: Register, value: u16) {
        let idx = reg as usize;
        if idx < NUM_WORD_REGS {
            self.regs[idx] = Some(value);
        }
    }

    /// Read back a register value, if one has been established.
    pub fn reg(&self, reg: Register) -> Option<u16> {
        let idx = reg as usize;
        if idx < NUM_WORD_REGS {
            self.regs[idx]
        } else {
            None
        }
    }
}

/// Compiler vendors recognized by the startup analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    /// Microsoft C.
    Microsoft,
    /// Borland C.
    Borland,
    /// Turbo/Borland Pascal.
    TurboPascal,
    /// Logitech Modula-2.
    Logitech,
    /// Not recognized.
    Unknown,
}

impl Vendor {
    /// Single-letter code used in signature file names.
    pub fn letter(self) -> char {
        match self {
            Self::Microsoft => 'm',
            Self::Borland => 'b',
            Self::TurboPascal => 't',
            Self::Logitech => 'l',
            Self::Unknown => 'x',
        }
    }

    /// Human-readable vendor name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Microsoft => "Microsoft C",
            Self::Borland => "Borland C",
            Self::TurboPascal => "Turbo Pascal",
            Self::Logitech => "Logitech Modula-2",
            Self::Unknown => "unknown",
        }
    }
}

/// Memory models recognized by the `main`-call locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryModel {
    /// Near code, near data.
    Small,
    /// Near code, far data.
    Compact,
    /// Far code, near data.
    Medium,
    /// Far code, far data.
    Large,
    /// Turbo Pascal (single model).
    Pascal,
    /// Not recognized.
    Unknown,
}

impl MemoryModel {
    /// Single-letter code used in signature file names.
    pub fn letter(self) -> char {
        match self {
            Self::Small => 's',
            Self::Compact => 'c',
            Self::Medium => 'm',
            Self::Large => 'l',
            Self::Pascal => 'p',
            Self::Unknown => 'x',
        }
    }
}

/// The (vendor, version, memory model) triple recovered from startup code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Compiler vendor.
    pub vendor: Vendor,
    /// Single-character version ('x' when unknown).
    pub version: char,
    /// Memory model.
    pub model: MemoryModel,
}

impl Provenance {
    /// Fully unknown provenance, used when no pattern matches.
    pub fn unknown() -> Self {
        Self {
            vendor: Vendor::Unknown,
            version: 'x',
            model: MemoryModel::Unknown,
        }
    }

    /// Name of the signature file this provenance selects,
    /// e.g. `dccm5s.sig` for Microsoft C 5, small model.
    pub fn sig_file_name(&self) -> String {
        format!(
            "dcc{}{}{}.sig",
            self.vendor.letter(),
            self.version,
            self.model.letter()
        )
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{} ({} model)",
            self.vendor.name(),
            self.version,
            self.model.letter()
        )
    }
}
