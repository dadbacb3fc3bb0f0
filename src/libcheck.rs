//! Library identification for discovered procedures.
//!
//! Holds the loaded signature database and prototype table and decorates
//! procedures with them: a procedure whose entry bytes hash-confirm
//! against a signature gets its symbolic name, and — when the symbol has a
//! prototype — its argument types, return type and live-out registers.
//! A symbol with no prototype is a compiler runtime helper: it keeps its
//! name but is decompiled like user code.

use std::path::PathBuf;
use tracing::debug;

use crate::error::Result;
use crate::fixwild::fix_wildcards;
use crate::image::Image;
use crate::proc::{ProcFlags, Procedure};
use crate::proto::{PrototypeTable, PROTO_FILE_NAME};
use crate::sig::SignatureDb;
use crate::types::{HlType, Provenance, RegisterSet};

/// Environment variable naming the directory that holds the data files.
pub const DATA_DIR_ENV: &str = "DCC";

/// The directory signature and prototype files are loaded from:
/// `$DCC`, falling back to the current directory.
pub fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Full path of the signature file a provenance selects.
pub fn signature_path(prov: &Provenance) -> PathBuf {
    data_dir().join(prov.sig_file_name())
}

/// Full path of the prototype data file.
pub fn prototype_path() -> PathBuf {
    data_dir().join(PROTO_FILE_NAME)
}

/// The loaded library-identification context.
///
/// Construction loads both data files; dropping it releases them. Either
/// file may be absent, in which case matching degrades rather than fails.
#[derive(Debug, Default)]
pub struct LibraryContext {
    sig: Option<SignatureDb>,
    protos: Option<PrototypeTable>,
}

impl LibraryContext {
    /// Load the signature file selected by `prov` plus the prototype
    /// table, resolving both against [`data_dir`].
    pub fn setup(prov: &Provenance) -> Result<Self> {
        let sig = SignatureDb::load(signature_path(prov))?;
        let protos = PrototypeTable::load(prototype_path())?;
        Ok(Self { sig, protos })
    }

    /// A context with no data loaded; every check misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a context from already-loaded parts.
    pub fn from_parts(sig: Option<SignatureDb>, protos: Option<PrototypeTable>) -> Self {
        Self { sig, protos }
    }

    /// The loaded signature database, if any.
    pub fn signatures(&self) -> Option<&SignatureDb> {
        self.sig.as_ref()
    }

    /// The loaded prototype table, if any.
    pub fn prototypes(&self) -> Option<&PrototypeTable> {
        self.protos.as_ref()
    }

    /// Check one procedure against the signature database, decorating it
    /// on a hit. Returns whether the procedure is a library function to be
    /// replaced rather than decompiled.
    pub fn library_check(&self, proc: &mut Procedure, image: &Image) -> bool {
        if image.off_main == Some(proc.entry) {
            // easy: this procedure is called main
            proc.name = "main".to_string();
            return false;
        }

        let Some(sig) = &self.sig else {
            return false;
        };
        let entry = proc.entry as usize;
        let Some(window) = image.bytes().get(entry..entry + sig.pat_len()) else {
            return false;
        };
        let mut pattern = window.to_vec();
        fix_wildcards(&mut pattern);

        let Some(symbol) = sig.lookup(&pattern) else {
            return false;
        };
        if proc.name.is_empty() {
            // don't overwrite an existing name
            proc.name = symbol.to_string();
        }
        debug!(entry, symbol, "signature hit");

        match &self.protos {
            Some(table) if !table.is_empty() => match table.search(symbol) {
                Some(func) => {
                    proc.flags |= ProcFlags::IS_LIB;
                    proc.args = table.arg_types(func).to_vec();
                    if func.ret != HlType::Unknown {
                        proc.flags |= ProcFlags::IS_FUNC;
                        proc.ret = func.ret;
                        proc.live_out = return_live_out(func.ret);
                    }
                    if func.vararg {
                        proc.flags |= ProcFlags::VARARG;
                    }
                }
                None => {
                    // known symbol, but not in any header file: a runtime
                    // helper that still has to be decompiled
                    proc.flags |= ProcFlags::RUNTIME;
                }
            },
            // no prototype data at all: take the hit on name alone
            _ => proc.flags |= ProcFlags::IS_LIB,
        }

        proc.flags.contains(ProcFlags::IS_LIB)
    }
}

/// Registers a return value of the given type lives in.
fn return_live_out(ret: HlType) -> RegisterSet {
    match ret {
        HlType::ByteSign | HlType::ByteUnsign => RegisterSet::AL,
        HlType::WordSign | HlType::WordUnsign => RegisterSet::AX,
        HlType::LongSign | HlType::LongUnsign => RegisterSet::DX | RegisterSet::AX,
        _ => RegisterSet::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::testutil::make_table;
    use crate::sig::testutil::{make_db, pattern};
    use crate::sig::PAT_LEN;

    fn image_with_entry(window: &[u8]) -> (Image, u32) {
        let image = Image::from_com_bytes(window);
        (image, crate::image::PSP_SIZE as u32)
    }

    fn sample_context() -> LibraryContext {
        let sig = make_db(&[
            ("printf", pattern(0xB8)),
            ("ftol@", pattern(0x55)),
            ("ltoa", pattern(0x8B)),
        ]);
        let protos = make_table(
            &[
                ("ltoa", HlType::LongSign, 3, 1, false),
                ("printf", HlType::WordSign, 1, 0, true),
            ],
            &[
                HlType::Ptr,      // printf format
                HlType::LongSign, // ltoa value
                HlType::Ptr,      // ltoa buffer
                HlType::WordSign, // ltoa radix
            ],
        );
        LibraryContext::from_parts(Some(sig), Some(protos))
    }

    #[test]
    fn test_main_is_named_not_matched() {
        let ctx = sample_context();
        let (mut image, entry) = image_with_entry(&pattern(0xB8));
        image.off_main = Some(entry);
        let mut proc = Procedure::new(entry);
        assert!(!ctx.library_check(&mut proc, &image));
        assert_eq!(proc.name, "main");
        assert!(proc.flags.is_empty());
    }

    #[test]
    fn test_vararg_function_hit() {
        let ctx = sample_context();
        let (image, entry) = image_with_entry(&pattern(0xB8));
        let mut proc = Procedure::new(entry);
        assert!(ctx.library_check(&mut proc, &image));
        assert_eq!(proc.name, "printf");
        assert!(proc.flags.contains(ProcFlags::IS_LIB));
        assert!(proc.flags.contains(ProcFlags::IS_FUNC));
        assert!(proc.flags.contains(ProcFlags::VARARG));
        assert!(!proc.flags.contains(ProcFlags::RUNTIME));
        assert_eq!(proc.ret, HlType::WordSign);
        assert_eq!(proc.live_out, RegisterSet::AX);
        assert_eq!(proc.args, vec![HlType::Ptr]);
    }

    #[test]
    fn test_long_return_lives_in_dx_ax() {
        let ctx = sample_context();
        let (image, entry) = image_with_entry(&pattern(0x8B));
        let mut proc = Procedure::new(entry);
        assert!(ctx.library_check(&mut proc, &image));
        assert_eq!(proc.name, "ltoa");
        assert_eq!(proc.live_out, RegisterSet::DX | RegisterSet::AX);
        assert_eq!(
            proc.args,
            vec![HlType::LongSign, HlType::Ptr, HlType::WordSign]
        );
    }

    #[test]
    fn test_unprototyped_symbol_is_runtime() {
        let ctx = sample_context();
        let (image, entry) = image_with_entry(&pattern(0x55));
        let mut proc = Procedure::new(entry);
        assert!(!ctx.library_check(&mut proc, &image));
        assert_eq!(proc.name, "ftol@");
        assert!(proc.flags.contains(ProcFlags::RUNTIME));
        assert!(!proc.flags.contains(ProcFlags::IS_LIB));
    }

    #[test]
    fn test_miss_sets_nothing() {
        let ctx = sample_context();
        let (image, entry) = image_with_entry(&pattern(0x33));
        let mut proc = Procedure::new(entry);
        assert!(!ctx.library_check(&mut proc, &image));
        assert!(proc.name.is_empty());
        assert!(proc.flags.is_empty());
    }

    #[test]
    fn test_existing_name_is_kept() {
        let ctx = sample_context();
        let (image, entry) = image_with_entry(&pattern(0xB8));
        let mut proc = Procedure::new(entry);
        proc.name = "proc_0001".to_string();
        assert!(ctx.library_check(&mut proc, &image));
        assert_eq!(proc.name, "proc_0001");
    }

    #[test]
    fn test_no_prototypes_degrades_to_is_lib() {
        let sig = make_db(&[("printf", pattern(0xB8))]);
        let ctx = LibraryContext::from_parts(Some(sig), None);
        let (image, entry) = image_with_entry(&pattern(0xB8));
        let mut proc = Procedure::new(entry);
        assert!(ctx.library_check(&mut proc, &image));
        assert!(proc.flags.contains(ProcFlags::IS_LIB));
        assert!(proc.args.is_empty());
    }

    #[test]
    fn test_entry_near_image_end_misses() {
        let ctx = sample_context();
        let (image, _) = image_with_entry(&pattern(0xB8)[..PAT_LEN - 4]);
        let mut proc = Procedure::new((image.len() - 2) as u32);
        assert!(!ctx.library_check(&mut proc, &image));
        assert!(proc.flags.is_empty());
    }

    #[test]
    fn test_empty_context_always_misses() {
        let ctx = LibraryContext::empty();
        let (image, entry) = image_with_entry(&pattern(0xB8));
        let mut proc = Procedure::new(entry);
        assert!(!ctx.library_check(&mut proc, &image));
    }
}
