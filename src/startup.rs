//! Startup-code analysis: compiler fingerprinting and `main` location.
//!
//! Compilers ship a fixed runtime prologue ahead of user code. Matching
//! anchored or windowed byte patterns against the entry point recovers the
//! vendor, version and memory model, the image offset of `main`, and the
//! initial DS value some prologues load. The recovered provenance selects
//! the signature file the library matcher will load.
//!
//! Pattern windows are clamped to the image; a window that does not fit
//! simply fails to match.

use tracing::{debug, info, warn};

use crate::image::Image;
use crate::sig::WILD;
use crate::types::{MachineState, MemoryModel, Provenance, Register, Vendor};

// Distance from the start of a main-call pattern to the operand of the
// call itself.
const OFF_MAIN_SMALL: usize = 13;
const OFF_MAIN_MEDIUM: usize = 13;
const OFF_MAIN_COMPACT: usize = 21;
const OFF_MAIN_LARGE: usize = 21;

// Startup patterns (vendor id)

const PATT_MSC5_START: &[u8] = &[
    0xB4, 0x30, // mov ah, 30
    0xCD, 0x21, // int 21 (dos version number)
    0x3C, 0x02, // cmp al, 2
    0x73, 0x02, // jnb $+4
    0xCD, 0x20, // int 20 (exit)
    0xBF, // mov di, DSEG
];

const PATT_MSC8_START: &[u8] = &[
    0xB4, 0x30, // mov ah, 30
    0xCD, 0x21, // int 21
    0x3C, 0x02, // cmp al, 2
    0x73, 0x05, // jnb $+7
    0x33, 0xC0, // xor ax, ax
    0x06, 0x50, // push es:ax
    0xCB, // retf
    0xBF, // mov di, DSEG
];

const PATT_MSC8_COM_START: &[u8] = &[
    0xB4, 0x30, // mov ah, 30
    0xCD, 0x21, // int 21 (dos version number)
    0x3C, 0x02, // cmp al, 2
    0x73, 0x01, // jnb $+3
    0xC3, // ret
    0x8C, 0xDF, // mov di, ds
];

const PATT_BORL2_START: &[u8] = &[
    0xBA, WILD, WILD, // mov dx, dseg
    0x2E, 0x89, 0x16, // mov cs:[], dx
    WILD, WILD, 0xB4, 0x30, // mov ah, 30
    0xCD, 0x21, // int 21 (dos version number)
    0x8B, 0x2E, 0x02, 0x00, // mov bp, [2]
    0x8B, 0x1E, 0x2C, 0x00, // mov bx, [2C]
    0x8E, 0xDA, // mov ds, dx
    0xA3, WILD, WILD, // mov [xx], ax
    0x8C, 0x06, WILD, WILD, // mov [xx], es
    0x89, 0x1E, WILD, WILD, // mov [xx], bx
    0x89, 0x2E, WILD, WILD, // mov [xx], bp
    0xC7, // mov [xx], -1
];

const PATT_BORL3_START: &[u8] = &[
    0xBA, WILD, WILD, // mov dx, dseg
    0x2E, 0x89, 0x16, // mov cs:[], dx
    WILD, WILD, 0xB4, 0x30, // mov ah, 30
    0xCD, 0x21, // int 21 (dos version number)
    0x8B, 0x2E, 0x02, 0x00, // mov bp, [2]
    0x8B, 0x1E, 0x2C, 0x00, // mov bx, [2C]
    0x8E, 0xDA, // mov ds, dx
    0xA3, WILD, WILD, // mov [xx], ax
    0x8C, 0x06, WILD, WILD, // mov [xx], es
    0x89, 0x1E, WILD, WILD, // mov [xx], bx
    0x89, 0x2E, WILD, WILD, // mov [xx], bp
    0xE8, // call ...
];

const PATT_BORL4_ON: &[u8] = &[
    0x9A, 0x00, 0x00, WILD, WILD, // call far init (offset always 0)
];

const PATT_BORL4_INIT: &[u8] = &[
    0xBA, WILD, WILD, // mov dx, dseg
    0x8E, 0xDA, // mov ds, dx
    0x8C, 0x06, WILD, WILD, // mov [xx], es
    0x8B, 0xC4, // mov ax, sp
    0x05, 0x13, 0x00, // add ax, 13h
    0xB1, 0x04, // mov cl, 4
    0xD3, 0xE8, // shr ax, cl
    0x8C, 0xD2, // mov dx, ss
];

const PATT_BORL5_INIT: &[u8] = &[
    0xBA, WILD, WILD, // mov dx, dseg
    0x8E, 0xDA, // mov ds, dx
    0x8C, 0x06, 0x30, 0x00, // mov [0030], es
    0x33, 0xED, // xor bp, bp
    0x8B, 0xC4, // mov ax, sp
    0x05, 0x13, 0x00, // add ax, 13h
    0xB1, 0x04, // mov cl, 4
    0xD3, 0xE8, // shr ax, cl
    0x8C, 0xD2, // mov dx, ss
];

const PATT_BORL7_INIT: &[u8] = &[
    0xBA, WILD, WILD, // mov dx, dseg
    0x8E, 0xDA, // mov ds, dx
    0x8C, 0x06, 0x30, 0x00, // mov [0030], es
    0xE8, WILD, WILD, // call xxxx
    0xE8, WILD, WILD, // call xxxx
    0x8B, 0xC4, // mov ax, sp
    0x05, 0x13, 0x00, // add ax, 13h
    0xB1, 0x04, // mov cl, 4
    0xD3, 0xE8, // shr ax, cl
    0x8C, 0xD2, // mov dx, ss
];

const PATT_LOGI_START: &[u8] = &[
    0xEB, 0x04, // jmp short $+6
    WILD, WILD, WILD, WILD, //
    0xB8, WILD, WILD, // mov ax, dseg
    0x8E, 0xD8, // mov ds, ax
];

const PATT_TPAS_START: &[u8] = &[
    0xE9, 0x79, 0x2C, // jmp 2D7C - Turbo Pascal 3.0
];

// Main-call patterns (model id). Works for Microsoft and Borland; the far
// data models are the near patterns with extra pushes, so they scan first.

const PATT_MAIN_SMALL: &[u8] = &[
    0xFF, 0x36, WILD, WILD, // push environment pointer
    0xFF, 0x36, WILD, WILD, // push argv
    0xFF, 0x36, WILD, WILD, // push argc
    0xE8, WILD, WILD, // call _main
    0x50, // push ax
    0xE8, // call _exit
];

const PATT_MAIN_MEDIUM: &[u8] = &[
    0xFF, 0x36, WILD, WILD, // push environment pointer
    0xFF, 0x36, WILD, WILD, // push argv
    0xFF, 0x36, WILD, WILD, // push argc
    0x9A, WILD, WILD, WILD, WILD, // call far _main
    0x50, // push ax
];

const PATT_MAIN_COMPACT: &[u8] = &[
    0xFF, 0x36, WILD, WILD, // push environment pointer lo
    0xFF, 0x36, WILD, WILD, // push environment pointer hi
    0xFF, 0x36, WILD, WILD, // push argv lo
    0xFF, 0x36, WILD, WILD, // push argv hi
    0xFF, 0x36, WILD, WILD, // push argc
    0xE8, WILD, WILD, // call _main
    0x50, // push ax
    0xE8, // call _exit
];

const PATT_MAIN_LARGE: &[u8] = &[
    0xFF, 0x36, WILD, WILD, // push environment pointer lo
    0xFF, 0x36, WILD, WILD, // push environment pointer hi
    0xFF, 0x36, WILD, WILD, // push argv lo
    0xFF, 0x36, WILD, WILD, // push argv hi
    0xFF, 0x36, WILD, WILD, // push argc
    0x9A, WILD, WILD, WILD, WILD, // call far _main
    0x50, // push ax
];

/// Search `source[min..max]` for a pattern that may contain [`WILD`]
/// bytes. The window is clamped to the image; returns the absolute index
/// of the first match.
pub fn locate_pattern(source: &[u8], min: usize, max: usize, pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() {
        return None;
    }
    let last = max.min(source.len()).checked_sub(pattern.len())?;
    if min > last {
        return None;
    }
    let first = pattern[0];
    if first == WILD {
        return (min..=last).find(|&i| matches_at(source, i, pattern));
    }
    // concrete first byte: let memchr skip the bulk of the window
    let mut i = min;
    while i <= last {
        let off = memchr::memchr(first, &source[i..=last])?;
        let candidate = i + off;
        if matches_at(source, candidate, pattern) {
            return Some(candidate);
        }
        i = candidate + 1;
    }
    None
}

/// Anchored wildcard compare at one position.
fn matches_at(source: &[u8], at: usize, pattern: &[u8]) -> bool {
    source
        .get(at..at.saturating_add(pattern.len()))
        .map_or(false, |window| {
            window
                .iter()
                .zip(pattern)
                .all(|(&s, &p)| p == WILD || s == p)
        })
}

/// Turbo/Borland Pascal v4+ probe: the first five bytes are a far call
/// into the runtime init, and the init body dates the version.
fn try_turbo_pascal(state: &mut MachineState, image: &mut Image, start_off: usize) -> Option<Provenance> {
    locate_pattern(image.bytes(), start_off, start_off + 5, PATT_BORL4_ON)?;
    let rel = image.u16_le(start_off + 1)? as usize;
    let para = image.u16_le(start_off + 3)? as usize;
    let init = (para << 4) + rel;

    let candidates: [(&[u8], char); 3] = [
        (PATT_BORL4_INIT, '4'),
        (PATT_BORL5_INIT, '5'),
        (PATT_BORL7_INIT, '7'),
    ];
    for (pattern, version) in candidates {
        if let Some(m) = locate_pattern(image.bytes(), init, init + 26, pattern) {
            if let Some(ds) = image.u16_le(m + 1) {
                state.set_reg(Register::Ds, ds);
            }
            info!("Borland Pascal v{version} detected");
            // code starts immediately at the five-byte call
            image.off_main = Some(start_off as u32);
            image.seg_main = image.init_cs();
            return Some(Provenance {
                vendor: Vendor::TurboPascal,
                version,
                model: MemoryModel::Pascal,
            });
        }
    }
    None
}

/// Analyze the startup code at the image entry point.
///
/// Recovers the compiler provenance, locates `main`, and establishes the
/// initial DS value where the prologue loads one. Unrecognized startup
/// code degrades to placeholder provenance with a warning.
pub fn check_startup(state: &mut MachineState, image: &mut Image) -> Provenance {
    let start_off = image.start_offset();

    // Turbo Pascal v4+ involves only the first five bytes; probing it
    // first avoids false positives from the windowed scans below.
    if let Some(prov) = try_turbo_pascal(state, image, start_off) {
        info!(signature_file = %prov.sig_file_name(), "startup analysis complete");
        return prov;
    }

    let mut model = MemoryModel::Unknown;
    let mut vendor = Vendor::Unknown;
    let mut version = 'x';

    // The call-to-main pattern is compiler independent but decides the
    // model. Far data models first: the near patterns are their prefixes.
    if let Some(m) = locate_pattern(image.bytes(), start_off, start_off + 0x180, PATT_MAIN_LARGE) {
        if let (Some(rel), Some(para)) = (
            image.u16_le(m + OFF_MAIN_LARGE),
            image.u16_le(m + OFF_MAIN_LARGE + 2),
        ) {
            image.off_main = Some((u32::from(para) << 4) + u32::from(rel));
            image.seg_main = para;
        }
        model = MemoryModel::Large;
    } else if let Some(m) =
        locate_pattern(image.bytes(), start_off, start_off + 0x180, PATT_MAIN_COMPACT)
    {
        if let Some(rel) = image.i16_le(m + OFF_MAIN_COMPACT) {
            let off = m as i64 + OFF_MAIN_COMPACT as i64 + 2 + i64::from(rel);
            image.off_main = (off >= 0).then_some(off as u32);
            image.seg_main = image.init_cs();
        }
        model = MemoryModel::Compact;
    } else if let Some(m) =
        locate_pattern(image.bytes(), start_off, start_off + 0x180, PATT_MAIN_MEDIUM)
    {
        if let (Some(rel), Some(para)) = (
            image.u16_le(m + OFF_MAIN_MEDIUM),
            image.u16_le(m + OFF_MAIN_MEDIUM + 2),
        ) {
            image.off_main = Some((u32::from(para) << 4) + u32::from(rel));
            image.seg_main = para;
        }
        model = MemoryModel::Medium;
    } else if let Some(m) =
        locate_pattern(image.bytes(), start_off, start_off + 0x180, PATT_MAIN_SMALL)
    {
        if let Some(rel) = image.i16_le(m + OFF_MAIN_SMALL) {
            let off = m as i64 + OFF_MAIN_SMALL as i64 + 2 + i64::from(rel);
            image.off_main = (off >= 0).then_some(off as u32);
            image.seg_main = image.init_cs();
        }
        model = MemoryModel::Small;
    } else if matches_at(image.bytes(), start_off, PATT_TPAS_START) {
        if let Some(rel) = image.i16_le(start_off + 1) {
            // the first 0x20 bytes after the jump target set up the runtime
            let off = start_off as i64 + 3 + i64::from(rel) + 0x20;
            image.off_main = (off >= 0).then_some(off as u32);
        }
        image.seg_main = image.init_cs();
        let prov = Provenance {
            vendor: Vendor::TurboPascal,
            version: '3',
            model: MemoryModel::Pascal,
        };
        info!("Turbo Pascal 3.0 detected");
        info!(off_main = ?image.off_main, signature_file = %prov.sig_file_name(), "startup analysis complete");
        return prov;
    } else {
        warn!("main could not be located");
        image.off_main = None;
    }

    debug!(model = %model.letter(), "memory model determined");

    // Vendor and version
    if matches_at(image.bytes(), start_off, PATT_MSC5_START) {
        // DS sits right after the matched prologue
        if let Some(ds) = image.u16_le(start_off + PATT_MSC5_START.len()) {
            state.set_reg(Register::Ds, ds);
        }
        vendor = Vendor::Microsoft;
        version = '5';
        info!("Microsoft C v5 detected");
    } else if matches_at(image.bytes(), start_off, PATT_MSC8_START) {
        if let Some(ds) = image.u16_le(start_off + PATT_MSC8_START.len()) {
            state.set_reg(Register::Ds, ds);
        }
        vendor = Vendor::Microsoft;
        version = '8';
        info!("Microsoft C v8 detected");
    } else if matches_at(image.bytes(), start_off, PATT_MSC8_COM_START) {
        vendor = Vendor::Microsoft;
        version = '8';
        info!("Microsoft C v8 .com detected");
    } else if let Some(m) =
        locate_pattern(image.bytes(), start_off, start_off + 0x30, PATT_BORL2_START)
    {
        // DS is the operand of the leading mov dx, dseg
        if let Some(ds) = image.u16_le(m + 1) {
            state.set_reg(Register::Ds, ds);
        }
        vendor = Vendor::Borland;
        version = '2';
        info!("Borland C v2 detected");
    } else if let Some(m) =
        locate_pattern(image.bytes(), start_off, start_off + 0x30, PATT_BORL3_START)
    {
        if let Some(ds) = image.u16_le(m + 1) {
            state.set_reg(Register::Ds, ds);
        }
        vendor = Vendor::Borland;
        version = '3';
        info!("Borland C v3 detected");
    } else if locate_pattern(image.bytes(), start_off, start_off + 0x30, PATT_LOGI_START).is_some()
    {
        // DS really is 0 here, despite the mov ax, dseg in the pattern
        vendor = Vendor::Logitech;
        version = '1';
        info!("Logitech Modula-2 detected");
    } else {
        warn!("compiler not recognised");
    }

    let prov = Provenance {
        vendor,
        version,
        model,
    };
    info!(signature_file = %prov.sig_file_name(), "startup analysis complete");
    prov
}

#[cfg(test)]
mod tests {
    use super::*;

    fn com_image(body: &[u8]) -> Image {
        Image::from_com_bytes(body)
    }

    #[test]
    fn test_locate_pattern_with_wilds() {
        let source = [0x00, 0xFF, 0x36, 0xAB, 0xCD, 0x00];
        let pattern = [0xFF, 0x36, WILD, WILD];
        assert_eq!(locate_pattern(&source, 0, source.len(), &pattern), Some(1));
    }

    #[test]
    fn test_locate_pattern_respects_window() {
        let source = [0x00, 0x00, 0x90, 0x00];
        assert_eq!(locate_pattern(&source, 0, 2, &[0x90]), None);
        assert_eq!(locate_pattern(&source, 0, 3, &[0x90]), Some(2));
        // window past the image clamps instead of matching out of bounds
        assert_eq!(locate_pattern(&source, 3, 100, &[0x90]), None);
    }

    #[test]
    fn test_locate_pattern_skips_partial_match() {
        let source = [0xE8, 0x00, 0xE8, 0x12, 0x34];
        let pattern = [0xE8, 0x12, WILD];
        assert_eq!(locate_pattern(&source, 0, source.len(), &pattern), Some(2));
    }

    #[test]
    fn test_microsoft_c5_small() {
        // Prologue, the DS word, then the small-model call to main.
        let mut body = Vec::new();
        body.extend_from_slice(PATT_MSC5_START);
        body.extend_from_slice(&0x1234u16.to_le_bytes()); // DSEG
        body.resize(0x40, 0x90);
        let main_at = body.len();
        body.extend_from_slice(&[
            0xFF, 0x36, 0x02, 0x00, // push env
            0xFF, 0x36, 0x04, 0x00, // push argv
            0xFF, 0x36, 0x06, 0x00, // push argc
            0xE8, 0x10, 0x00, // call main (+0x10)
            0x50, // push ax
            0xE8, // call exit
        ]);
        body.push(0x00);

        let mut image = com_image(&body);
        let mut state = MachineState::new();
        let prov = check_startup(&mut state, &mut image);

        assert_eq!(prov.vendor, Vendor::Microsoft);
        assert_eq!(prov.version, '5');
        assert_eq!(prov.model, MemoryModel::Small);
        assert_eq!(prov.sig_file_name(), "dccm5s.sig");
        assert_eq!(state.reg(Register::Ds), Some(0x1234));
        let m = 0x100 + main_at;
        assert_eq!(image.off_main, Some((m + 13 + 2 + 0x10) as u32));
        assert_eq!(image.seg_main, image.init_cs());
    }

    #[test]
    fn test_turbo_pascal_3() {
        let mut image = com_image(&[0xE9, 0x79, 0x2C, 0x00]);
        let mut state = MachineState::new();
        let prov = check_startup(&mut state, &mut image);

        assert_eq!(prov.vendor, Vendor::TurboPascal);
        assert_eq!(prov.version, '3');
        assert_eq!(prov.model, MemoryModel::Pascal);
        assert_eq!(prov.sig_file_name(), "dcct3p.sig");
        // no DS probe for Pascal 3
        assert_eq!(state.reg(Register::Ds), None);
        let start = 0x100u32;
        assert_eq!(image.off_main, Some(start + 3 + 0x2C79 + 0x20));
    }

    #[test]
    fn test_large_model_main_locator() {
        let mut body = vec![0x90u8; 0x10];
        body.extend_from_slice(&[
            0xFF, 0x36, 0x00, 0x00, // push env lo
            0xFF, 0x36, 0x02, 0x00, // push env hi
            0xFF, 0x36, 0x04, 0x00, // push argv lo
            0xFF, 0x36, 0x06, 0x00, // push argv hi
            0xFF, 0x36, 0x08, 0x00, // push argc
            0x9A, 0xA0, 0x00, 0x50, 0x00, // call far 0050:00A0
            0x50, // push ax
        ]);

        let mut image = com_image(&body);
        let mut state = MachineState::new();
        let prov = check_startup(&mut state, &mut image);

        assert_eq!(prov.model, MemoryModel::Large);
        assert_eq!(image.off_main, Some((0x0050 << 4) + 0x00A0));
        assert_eq!(image.seg_main, 0x0050);
    }

    #[test]
    fn test_borland_pascal_5_probe() {
        // far call to init at image offset 0x180 (file offset 0x80):
        // the call offset is always 0, so the segment carries it all
        let mut body = vec![0u8; 0x100];
        body[0] = 0x9A;
        body[1..3].copy_from_slice(&0x0000u16.to_le_bytes()); // offset
        body[3..5].copy_from_slice(&0x0018u16.to_le_bytes()); // segment
        let init_in_body = 0x80;
        body[init_in_body..init_in_body + PATT_BORL5_INIT.len()]
            .copy_from_slice(PATT_BORL5_INIT);
        // concrete dseg operand in place of the wilds
        body[init_in_body + 1..init_in_body + 3].copy_from_slice(&0x6655u16.to_le_bytes());

        let mut image = com_image(&body);
        let mut state = MachineState::new();
        let prov = check_startup(&mut state, &mut image);

        assert_eq!(prov.vendor, Vendor::TurboPascal);
        assert_eq!(prov.version, '5');
        assert_eq!(prov.model, MemoryModel::Pascal);
        assert_eq!(state.reg(Register::Ds), Some(0x6655));
        assert_eq!(image.off_main, Some(0x100));
        assert_eq!(image.seg_main, image.init_cs());
    }

    #[test]
    fn test_unrecognized_startup_degrades() {
        let mut image = com_image(&[0u8; 0x200]);
        let mut state = MachineState::new();
        let prov = check_startup(&mut state, &mut image);

        assert_eq!(prov.vendor, Vendor::Unknown);
        assert_eq!(prov.version, 'x');
        assert_eq!(prov.model, MemoryModel::Unknown);
        assert_eq!(prov.sig_file_name(), "dccxxx.sig");
        assert_eq!(image.off_main, None);
    }
}
