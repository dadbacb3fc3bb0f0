//! Perfect-hash signature store.
//!
//! Loads a precomputed minimal perfect hash mapping canonicalized
//! function-body byte patterns to library symbol names, and answers
//! lookups against it. The hash is the Czech-Havas-Majewski construction:
//! two byte-indexed assistant tables `T1` and `T2` hash a pattern to two
//! graph vertices, and the function table `g` combines them into a slot.
//! The hash is perfect only for stored keys, so every lookup byte-confirms
//! the pattern against the slot's stored key before trusting it.
//!
//! The store is immutable after load. A missing file degrades to "no
//! signatures loaded"; a structurally corrupt file is an error.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{DecompilerError, Result};

/// Byte length of the canonicalized patterns this build is compiled for.
pub const PAT_LEN: usize = 23;

/// Byte length of symbol records, including the NUL terminator.
pub const SYM_LEN: usize = 16;

/// Wild byte: matches any source byte inside a pattern.
pub const WILD: u8 = 0xF4;

/// File magic of a signature file.
pub const SIG_MAGIC: &[u8; 4] = b"dccs";

const FILE: &str = "signature file";

/// One hash-table record: a symbol name and its canonicalized pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigEntry {
    symbol: Vec<u8>,
    pattern: Vec<u8>,
}

impl SigEntry {
    /// The symbol name, up to its NUL terminator.
    pub fn name(&self) -> &str {
        let end = self
            .symbol
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.symbol.len());
        std::str::from_utf8(&self.symbol[..end]).unwrap_or("")
    }

    /// The stored canonicalized pattern.
    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }
}

/// The loaded signature database. Immutable after load.
#[derive(Debug, Clone)]
pub struct SignatureDb {
    num_keys: usize,
    num_vert: usize,
    pat_len: usize,
    sym_len: usize,
    t1: Vec<u16>,
    t2: Vec<u16>,
    g: Vec<u16>,
    entries: Vec<SigEntry>,
}

impl SignatureDb {
    /// Load a signature file from disk.
    ///
    /// Returns `Ok(None)` when the file does not exist (the store degrades
    /// to empty and a warning is logged); any structural problem with an
    /// existing file is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot open signature file, continuing without signatures");
                return Ok(None);
            }
        };
        let db = Self::read_from(&mut io::BufReader::new(file))?;
        debug!(path = %path.display(), keys = db.num_keys, "signature file loaded");
        Ok(Some(db))
    }

    /// Parse a signature database from a reader.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let magic = read_bytes(r, 4, FILE, "magic")?;
        if magic != SIG_MAGIC[..] {
            return Err(DecompilerError::BadMagic {
                file: FILE,
                expected: "dccs",
                found: hex::encode(&magic),
            });
        }

        let num_keys = read_word(r, FILE, "key count")? as usize;
        let num_vert = read_word(r, FILE, "vertex count")? as usize;
        let pat_len = read_word(r, FILE, "pattern length")? as usize;
        let sym_len = read_word(r, FILE, "symbol length")? as usize;

        if pat_len != PAT_LEN || sym_len != SYM_LEN {
            return Err(DecompilerError::SignatureLengths {
                pat: pat_len,
                sym: sym_len,
                expected_pat: PAT_LEN,
                expected_sym: SYM_LEN,
            });
        }
        if num_keys == 0 {
            return Err(DecompilerError::EmptySignatures { field: "key count" });
        }
        if num_vert == 0 {
            return Err(DecompilerError::EmptySignatures {
                field: "vertex count",
            });
        }

        let table_len = pat_len * 256 * 2;
        let t1 = read_u16_section(r, "T1", table_len)?;
        let t2 = read_u16_section(r, "T2", table_len)?;
        let g = read_u16_section(r, "gg", num_vert * 2)?;

        expect_tag(r, FILE, "ht")?;
        let stored = read_word(r, FILE, "ht length")? as usize;
        let calculated = num_keys * (sym_len + pat_len);
        if stored != calculated {
            return Err(DecompilerError::SectionSize {
                file: FILE,
                section: "ht",
                stored,
                calculated,
            });
        }

        let mut entries = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            let symbol = read_bytes(r, sym_len, FILE, "signature symbol")?;
            let pattern = read_bytes(r, pat_len, FILE, "signature pattern")?;
            entries.push(SigEntry { symbol, pattern });
        }

        Ok(Self {
            num_keys,
            num_vert,
            pat_len,
            sym_len,
            t1,
            t2,
            g,
            entries,
        })
    }

    /// Write the database back out in the file layout it was loaded from.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(SIG_MAGIC)?;
        w.write_u16::<LittleEndian>(self.num_keys as u16)?;
        w.write_u16::<LittleEndian>(self.num_vert as u16)?;
        w.write_u16::<LittleEndian>(self.pat_len as u16)?;
        w.write_u16::<LittleEndian>(self.sym_len as u16)?;

        for (tag, table) in [("T1", &self.t1), ("T2", &self.t2), ("gg", &self.g)] {
            w.write_all(tag.as_bytes())?;
            w.write_u16::<LittleEndian>((table.len() * 2) as u16)?;
            for &word in table.iter() {
                w.write_u16::<LittleEndian>(word)?;
            }
        }

        w.write_all(b"ht")?;
        w.write_u16::<LittleEndian>((self.num_keys * (self.sym_len + self.pat_len)) as u16)?;
        for entry in &self.entries {
            w.write_all(&entry.symbol)?;
            w.write_all(&entry.pattern)?;
        }
        Ok(())
    }

    /// Number of stored keys.
    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    /// Pattern length the database was built for.
    pub fn pat_len(&self) -> usize {
        self.pat_len
    }

    /// The stored hash-table records.
    pub fn entries(&self) -> &[SigEntry] {
        &self.entries
    }

    /// Hash a canonicalized pattern to its slot.
    ///
    /// The result is a valid slot for *any* input; only a byte-confirmed
    /// lookup may be trusted.
    pub fn hash(&self, pattern: &[u8]) -> usize {
        let mut u: u32 = 0;
        let mut v: u32 = 0;
        for (i, &b) in pattern.iter().take(self.pat_len).enumerate() {
            u = u.wrapping_add(u32::from(self.t1[i * 256 + b as usize]));
            v = v.wrapping_add(u32::from(self.t2[i * 256 + b as usize]));
        }
        let u = u as usize % self.num_vert;
        let v = v as usize % self.num_vert;
        (self.g[u] as usize + self.g[v] as usize) % self.num_keys
    }

    /// Hash and byte-confirm a canonicalized pattern.
    pub fn lookup(&self, pattern: &[u8]) -> Option<&str> {
        if pattern.len() < self.pat_len {
            return None;
        }
        let entry = &self.entries[self.hash(pattern)];
        if entry.pattern == pattern[..self.pat_len] {
            Some(entry.name())
        } else {
            None
        }
    }
}

fn read_u16_section<R: Read>(r: &mut R, tag: &'static str, expected_len: usize) -> Result<Vec<u16>> {
    expect_tag(r, FILE, tag)?;
    let stored = read_word(r, FILE, "section length")? as usize;
    if stored != expected_len {
        return Err(DecompilerError::SectionSize {
            file: FILE,
            section: tag,
            stored,
            calculated: expected_len,
        });
    }
    let mut table = vec![0u16; expected_len / 2];
    r.read_u16_into::<LittleEndian>(&mut table)
        .map_err(|e| map_read_err(e, FILE, tag))?;
    Ok(table)
}

pub(crate) fn expect_tag<R: Read>(r: &mut R, file: &'static str, tag: &'static str) -> Result<()> {
    let found = read_bytes(r, tag.len(), file, "section tag")?;
    if found != tag.as_bytes() {
        return Err(DecompilerError::BadSection {
            file,
            expected: tag,
            found: hex::encode(&found),
        });
    }
    Ok(())
}

pub(crate) fn read_bytes<R: Read>(
    r: &mut R,
    n: usize,
    file: &'static str,
    what: &'static str,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)
        .map_err(|e| map_read_err(e, file, what))?;
    Ok(buf)
}

pub(crate) fn read_word<R: Read>(r: &mut R, file: &'static str, what: &'static str) -> Result<u16> {
    r.read_u16::<LittleEndian>()
        .map_err(|e| map_read_err(e, file, what))
}

pub(crate) fn map_read_err(e: io::Error, file: &'static str, what: &'static str) -> DecompilerError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        DecompilerError::Truncated { file, what }
    } else {
        DecompilerError::Io(e)
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::{make_db, make_sig_bytes, pattern};
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_every_stored_key_confirms() {
        let db = make_db(&[
            ("_exit", pattern(0x55)),
            ("printf", pattern(0xB8)),
            ("strlen", pattern(0x8B)),
        ]);
        for entry in db.entries() {
            let pat = entry.pattern().to_vec();
            let name = entry.name().to_string();
            assert_eq!(db.lookup(&pat), Some(name.as_str()));
        }
    }

    #[test]
    fn test_unstored_pattern_misses() {
        let db = make_db(&[("_exit", pattern(0x55)), ("printf", pattern(0xB8))]);
        // Differs from every stored key in a non-wild position.
        assert_eq!(db.lookup(&pattern(0x33)), None);
        let mut near = pattern(0x55);
        near[10] ^= 0xFF;
        assert_eq!(db.lookup(&near), None);
    }

    #[test]
    fn test_short_candidate_misses() {
        let db = make_db(&[("_exit", pattern(0x55))]);
        assert_eq!(db.lookup(&[0x55u8; 4]), None);
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let mut bytes = make_sig_bytes(&[("_exit", pattern(0x55))]);
        bytes[0] = b'x';
        let err = SignatureDb::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, DecompilerError::BadMagic { .. }));
    }

    #[test]
    fn test_wrong_tag_is_fatal() {
        let mut bytes = make_sig_bytes(&[("_exit", pattern(0x55))]);
        // Corrupt the "T1" tag
        bytes[12] = b'Q';
        let err = SignatureDb::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, DecompilerError::BadSection { .. }));
    }

    #[test]
    fn test_size_mismatch_is_fatal() {
        let mut bytes = make_sig_bytes(&[("_exit", pattern(0x55))]);
        // Corrupt the T1 length word
        bytes[14] = 1;
        bytes[15] = 0;
        let err = SignatureDb::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(
            err,
            DecompilerError::SectionSize { section: "T1", .. }
        ));
    }

    #[test]
    fn test_wrong_pattern_length_is_fatal() {
        let mut bytes = make_sig_bytes(&[("_exit", pattern(0x55))]);
        // pat_len header word
        bytes[8] = 7;
        bytes[9] = 0;
        let err = SignatureDb::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, DecompilerError::SignatureLengths { .. }));
    }

    #[test]
    fn test_truncated_is_fatal() {
        let bytes = make_sig_bytes(&[("_exit", pattern(0x55))]);
        let err = SignatureDb::read_from(&mut &bytes[..bytes.len() - 5]).unwrap_err();
        assert!(matches!(err, DecompilerError::Truncated { .. }));
    }

    #[test]
    fn test_dump_reload_is_byte_identical() {
        let bytes = make_sig_bytes(&[("_exit", pattern(0x55)), ("printf", pattern(0xB8))]);
        let db = SignatureDb::read_from(&mut &bytes[..]).unwrap();
        let mut dumped = Vec::new();
        db.write_to(&mut dumped).unwrap();
        assert_eq!(dumped, bytes);
    }

    #[test]
    fn test_missing_file_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let db = SignatureDb::load(dir.path().join("dccm5s.sig")).unwrap();
        assert!(db.is_none());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dccm5s.sig");
        std::fs::write(&path, make_sig_bytes(&[("printf", pattern(0xB8))])).unwrap();
        let db = SignatureDb::load(&path).unwrap().unwrap();
        assert_eq!(db.num_keys(), 1);
        assert_eq!(db.lookup(&pattern(0xB8)), Some("printf"));
    }
}
