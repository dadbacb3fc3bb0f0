//! Error types for the decompiler core.
//!
//! The variants here split into two families matching the recovery policy:
//! structural corruption of a data file (bad magic, wrong section order,
//! size mismatch, truncation) and image-level failures. A data file that is
//! merely *missing* is not an error at all — the loaders degrade to an empty
//! store and the caller logs a warning.

use thiserror::Error;

/// Primary error type for the decompiler core.
#[derive(Debug, Error)]
pub enum DecompilerError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A data file does not start with the expected magic bytes.
    #[error("{file}: bad magic: expected {expected:?}, found {found}")]
    BadMagic {
        /// Which file kind was being read ("signature file", "prototype file", ...).
        file: &'static str,
        /// The magic string that should have been present.
        expected: &'static str,
        /// Hex rendering of the bytes actually found.
        found: String,
    },

    /// A framed section arrived out of order or under the wrong tag.
    #[error("{file}: expected {expected:?} section, found {found}")]
    BadSection {
        /// Which file kind was being read.
        file: &'static str,
        /// The section tag that should have come next.
        expected: &'static str,
        /// Hex rendering of the tag actually found.
        found: String,
    },

    /// A section's stored length disagrees with the length computed from
    /// the header parameters.
    #[error("{file}: size of {section}: file says {stored} bytes, calculated {calculated}")]
    SectionSize {
        /// Which file kind was being read.
        file: &'static str,
        /// The section whose length is wrong.
        section: &'static str,
        /// Length stored in the file.
        stored: usize,
        /// Length implied by the header parameters.
        calculated: usize,
    },

    /// The signature database was built for different pattern/symbol lengths
    /// than this build expects.
    #[error(
        "signature file built for pattern/symbol lengths {pat}/{sym}, \
         this build expects {expected_pat}/{expected_sym}"
    )]
    SignatureLengths {
        /// Pattern length stored in the file.
        pat: usize,
        /// Symbol length stored in the file.
        sym: usize,
        /// Pattern length compiled into this build.
        expected_pat: usize,
        /// Symbol length compiled into this build.
        expected_sym: usize,
    },

    /// A header parameter that must be non-zero is zero.
    #[error("signature file: {field} is zero")]
    EmptySignatures {
        /// The offending header field.
        field: &'static str,
    },

    /// A read ended before the expected number of bytes arrived.
    #[error("{file}: truncated while reading {what}")]
    Truncated {
        /// Which file kind was being read.
        file: &'static str,
        /// What was being read when the data ran out.
        what: &'static str,
    },

    /// The executable image is too small to carry an MZ header.
    #[error("image too small: expected at least {expected} bytes, got {actual}")]
    ImageTooSmall {
        /// Minimum size for the header.
        expected: usize,
        /// Actual file size.
        actual: usize,
    },

    /// The executable carries an extended (NE/LE/LX/PE) header and is not a
    /// plain 16-bit DOS program.
    #[error("new-style executable ({kind}) is not a plain DOS program")]
    NewExeFormat {
        /// The extended signature that was found.
        kind: &'static str,
    },
}

/// Result type alias for decompiler operations.
pub type Result<T> = std::result::Result<T, DecompilerError>;
