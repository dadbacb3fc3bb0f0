//! Library prototype table.
//!
//! `dcclibs.dat` is a binary table of function prototypes harvested from
//! vendor header files: names, return types and argument-type sequences.
//! Only symbols present here are real library functions; a signature hit
//! whose symbol is absent is a runtime helper that still has to be
//! decompiled. Records are sorted by name so lookups binary-search.

use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{DecompilerError, Result};
use crate::sig::{expect_tag, map_read_err, read_bytes, read_word, SYM_LEN};
use crate::types::HlType;

/// File magic of a prototype file.
pub const PROTO_MAGIC: &[u8; 4] = b"dccp";

/// Standard file name of the prototype table.
pub const PROTO_FILE_NAME: &str = "dcclibs.dat";

const FILE: &str = "prototype file";

/// One function prototype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncProto {
    /// Function name.
    pub name: String,
    /// Return type; [`HlType::Unknown`] for procedures.
    pub ret: HlType,
    /// Number of declared arguments.
    pub num_args: u16,
    /// Index of the first argument in the flat argument-type array.
    pub first_arg: u16,
    /// Whether the function is variadic.
    pub vararg: bool,
}

/// The loaded prototype table. Immutable after load.
#[derive(Debug, Clone, Default)]
pub struct PrototypeTable {
    funcs: Vec<FuncProto>,
    arg_types: Vec<HlType>,
}

impl PrototypeTable {
    /// Load a prototype file from disk.
    ///
    /// Returns `Ok(None)` when the file does not exist; structural problems
    /// with an existing file are errors.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot open library prototype data file");
                return Ok(None);
            }
        };
        let table = Self::read_from(&mut io::BufReader::new(file))?;
        debug!(path = %path.display(), functions = table.funcs.len(), "prototype file loaded");
        Ok(Some(table))
    }

    /// Parse a prototype table from a reader.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let magic = read_bytes(r, 4, FILE, "magic")?;
        if magic != PROTO_MAGIC[..] {
            return Err(DecompilerError::BadMagic {
                file: FILE,
                expected: "dccp",
                found: hex::encode(&magic),
            });
        }

        expect_tag(r, FILE, "FN")?;
        let num_funcs = read_word(r, FILE, "function count")? as usize;
        let mut funcs = Vec::with_capacity(num_funcs);
        for _ in 0..num_funcs {
            let raw_name = read_bytes(r, SYM_LEN, FILE, "function name")?;
            let end = raw_name
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(raw_name.len());
            let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();
            let ret = HlType::from_u16(read_word(r, FILE, "return type")?);
            let num_args = read_word(r, FILE, "argument count")?;
            let first_arg = read_word(r, FILE, "first argument index")?;
            let mut vararg = [0u8; 1];
            r.read_exact(&mut vararg)
                .map_err(|e| map_read_err(e, FILE, "vararg flag"))?;
            funcs.push(FuncProto {
                name,
                ret,
                num_args,
                first_arg,
                vararg: vararg[0] != 0,
            });
        }

        expect_tag(r, FILE, "PM")?;
        let num_args = read_word(r, FILE, "parameter count")? as usize;
        let mut arg_types = Vec::with_capacity(num_args);
        for _ in 0..num_args {
            arg_types.push(HlType::from_u16(read_word(r, FILE, "parameter type")?));
        }

        Ok(Self { funcs, arg_types })
    }

    /// Number of stored prototypes.
    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    /// Whether the table holds no prototypes.
    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    /// Binary-search the table for a function name.
    pub fn search(&self, name: &str) -> Option<&FuncProto> {
        self.funcs
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.funcs[i])
    }

    /// The argument-type sequence of a prototype.
    pub fn arg_types(&self, proto: &FuncProto) -> &[HlType] {
        let start = proto.first_arg as usize;
        let end = start + proto.num_args as usize;
        self.arg_types.get(start..end).unwrap_or_default()
    }
}
