//! Wild-card normalization of candidate signature windows.
//!
//! Before a window of function-body bytes can be hashed it must be
//! canonicalized: operand bytes that vary from one linkage to the next —
//! relative call/jump displacements, far pointers, absolute memory
//! displacements subject to segment fixups — are overwritten with the
//! [`WILD`] byte. The walk is opcode-driven over 8086 encodings and stops
//! at the first opcode it does not recognize, leaving the tail untouched.
//!
//! Instruction lengths are derived only from opcode and ModRM bytes, never
//! from operand bytes, so normalizing an already-normalized window changes
//! nothing.

use crate::sig::WILD;

/// Overwrite linkage-variant operand bytes with [`WILD`] in place.
pub fn fix_wildcards(pat: &mut [u8]) {
    let mut i = 0;
    while i < pat.len() {
        let op = pat[i];
        i += 1;
        match op {
            // segment override prefixes
            0x26 | 0x2E | 0x36 | 0x3E => {}

            // single-byte: push/pop seg, push/pop/inc/dec reg, xchg,
            // cbw/cwd, sahf/lahf, flag ops, string ops, returns, hlt
            0x06 | 0x07 | 0x0E | 0x16 | 0x17 | 0x1E | 0x1F | 0x27 | 0x2F | 0x37 | 0x3F
            | 0x40..=0x5F | 0x90..=0x99 | 0x9C..=0x9F | 0xA4..=0xA7 | 0xAA..=0xAF | 0xC3
            | 0xCB | 0xCC | 0xCE | 0xCF | 0xF4 | 0xF5 | 0xF8..=0xFD => {}

            // imm8: int n, alu acc/imm8, mov reg8/imm8, in/out
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C | 0xB0..=0xB7 | 0xCD
            | 0xD4 | 0xD5 | 0xE4..=0xE7 => i += 1,

            // rel8: jcc, jcxz, loop, jmp short
            0x70..=0x7F | 0xE0..=0xE3 | 0xEB => i += 1,

            // imm16: alu acc/imm16, mov reg16/imm16, ret imm16
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D | 0xB8..=0xBF | 0xC2
            | 0xCA => i += 2,

            // mov acc <-> absolute memory: the address is fixed up
            0xA0..=0xA3 => {
                wild(pat, i, 2);
                i += 2;
            }

            // call/jmp rel16: displacement differs per linkage
            0xE8 | 0xE9 => {
                wild(pat, i, 2);
                i += 2;
            }

            // call/jmp far: offset and segment are both fixed up
            0x9A | 0xEA => {
                wild(pat, i, 4);
                i += 4;
            }

            // ModRM, no immediate: alu r/m, test/xchg, mov, lea,
            // seg moves, pop r/m, les/lds, shifts, inc/dec/call/jmp/push r/m
            0x00..=0x03 | 0x08..=0x0B | 0x10..=0x13 | 0x18..=0x1B | 0x20..=0x23
            | 0x28..=0x2B | 0x30..=0x33 | 0x38..=0x3B | 0x84..=0x8F | 0xC4 | 0xC5
            | 0xD0..=0xD3 | 0xFE | 0xFF => i = modrm(pat, i, 0),

            // ModRM + imm8
            0x80 | 0x82 | 0x83 | 0xC6 => i = modrm(pat, i, 1),

            // ModRM + imm16
            0x81 | 0xC7 => i = modrm(pat, i, 2),

            // group 3: TEST carries an immediate, the rest do not
            0xF6 | 0xF7 => {
                let imm = match pat.get(i) {
                    Some(m) if (m >> 3) & 7 == 0 => {
                        if op == 0xF7 {
                            2
                        } else {
                            1
                        }
                    }
                    _ => 0,
                };
                i = modrm(pat, i, imm);
            }

            // unrecognized: leave the rest of the window untouched
            _ => break,
        }
    }
}

/// Overwrite `n` bytes at `start` with [`WILD`], clamped to the window.
fn wild(pat: &mut [u8], start: usize, n: usize) {
    let start = start.min(pat.len());
    let end = start.saturating_add(n).min(pat.len());
    for b in &mut pat[start..end] {
        *b = WILD;
    }
}

/// Step over a ModRM byte and its displacement, wilding absolute
/// (mod 00, r/m 110) addresses, then over `imm` trailing immediate bytes.
fn modrm(pat: &mut [u8], at: usize, imm: usize) -> usize {
    let Some(&m) = pat.get(at) else {
        return pat.len();
    };
    let md = m >> 6;
    let rm = m & 7;
    let mut i = at + 1;
    match (md, rm) {
        (0, 6) => {
            wild(pat, i, 2);
            i += 2;
        }
        (1, _) => i += 1,
        (2, _) => i += 2,
        _ => {}
    }
    i + imm
}
