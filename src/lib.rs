//! Decompiler core for 16-bit DOS executables.
//!
//! This library recovers high-level structure from stripped real-mode
//! binaries. It covers the front half of a decompiler pipeline:
//!
//! - **Startup analysis**: anchored byte patterns at the entry point
//!   recover the compiler vendor, version and memory model, the location
//!   of `main`, and the initial DS value the runtime prologue loads.
//! - **Library identification**: a minimal perfect hash over
//!   canonicalized function-body patterns maps procedures back to their
//!   library symbol names and type signatures, so `proc_0042` becomes
//!   `printf(char *, ...)` instead of decompiled noise.
//! - **Long-variable lifting**: pairs of 16-bit operations on the halves
//!   of a 32-bit value collapse into single high-level operations, and
//!   two-CMP branch ladders collapse into single long conditionals with
//!   the basic-block graph rewritten in place.
//!
//! The disassembler that produces low-level icode, the analyzer that
//! builds basic blocks, and the back end that emits source text are
//! external collaborators; this crate defines the data model they share
//! ([`proc::Procedure`], [`icode::Icode`], [`cfg::Cfg`]) and the passes
//! above.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use dos_decompiler::{check_startup, Image, LibraryContext, MachineState};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut image = Image::load("demo.exe")?;
//!     let mut state = MachineState::new();
//!     let provenance = check_startup(&mut state, &mut image);
//!     println!("compiler: {provenance}");
//!
//!     // Loads dcc<vendor><version><model>.sig and dcclibs.dat from $DCC
//!     let library = LibraryContext::setup(&provenance)?;
//!     let _ = library;
//!     Ok(())
//! }
//! ```
//!
//! # Data files
//!
//! Signature files (`dcc<V><v><M>.sig`) and the prototype table
//! (`dcclibs.dat`) are resolved against the directory named by the `DCC`
//! environment variable, falling back to the current directory. A missing
//! file degrades the corresponding matching; a corrupt file is an error.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cfg;
pub mod error;
pub mod fixwild;
pub mod icode;
pub mod image;
pub mod libcheck;
pub mod locals;
pub mod proc;
pub mod proplong;
pub mod proto;
pub mod sig;
pub mod startup;
pub mod types;

pub use cfg::{BasicBlock, BbId, Cfg, EdgeSide, NodeType, RewriteStats};
pub use error::{DecompilerError, Result};
pub use fixwild::fix_wildcards;
pub use image::Image;
pub use libcheck::LibraryContext;
pub use proc::{ProcFlags, Procedure};
pub use proplong::propagate_longs;
pub use proto::PrototypeTable;
pub use sig::{SignatureDb, PAT_LEN, SYM_LEN, WILD};
pub use startup::{check_startup, locate_pattern};
pub use types::{
    HlType, MachineState, MemoryModel, Provenance, Register, RegisterSet, Vendor,
};

/// Version of this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
