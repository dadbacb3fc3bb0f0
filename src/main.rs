//! DOS decompiler front end.
//!
//! Loads a 16-bit DOS executable, fingerprints its startup code, and
//! reports the recovered provenance, the location of `main`, and the
//! state of the library signature data that provenance selects.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

use dos_decompiler::libcheck::{prototype_path, signature_path};
use dos_decompiler::{
    check_startup, fix_wildcards, Image, LibraryContext, MachineState, Provenance, Register,
    PAT_LEN,
};

/// Decompiler front end for 16-bit DOS executables.
#[derive(Parser, Debug)]
#[command(name = "dos-decompile", about, long_about = None)]
#[command(disable_version_flag = true)]
#[command(override_usage = "dos-decompile [-vVsmiaA] -f <DOS_executable>")]
struct Args {
    /// DOS executable to analyze
    #[arg(short = 'f', value_name = "DOS_executable")]
    file: PathBuf,

    /// Verbose: show analysis progress
    #[arg(short = 'v')]
    verbose: bool,

    /// Very verbose: debug-level progress plus a JSON report
    #[arg(short = 'V')]
    very_verbose: bool,

    /// Print signature and prototype statistics
    #[arg(short = 's')]
    stats: bool,

    /// Print the image memory map
    #[arg(short = 'm')]
    map: bool,

    /// Image-only analysis: skip signature and prototype loading
    #[arg(short = 'i')]
    image_only: bool,

    /// Dump the raw entry-point window
    #[arg(short = 'a')]
    dump_entry: bool,

    /// Dump the canonicalized (wildcarded) entry-point window
    #[arg(short = 'A')]
    dump_normalized: bool,
}

/// Machine-readable analysis report, printed at `-V`.
#[derive(Debug, Serialize)]
struct Report {
    file: String,
    provenance: Provenance,
    signature_file: String,
    signatures_loaded: bool,
    prototypes_loaded: bool,
    off_main: Option<u32>,
    seg_main: u16,
    ds: Option<u16>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.very_verbose {
        "dos_decompiler=debug"
    } else if args.verbose {
        "dos_decompiler=info"
    } else {
        "dos_decompiler=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dos-decompile: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let mut image = Image::load(&args.file)
        .with_context(|| format!("cannot load {}", args.file.display()))?;
    let mut state = MachineState::new();

    let provenance = check_startup(&mut state, &mut image);

    println!("Compiler:       {provenance}");
    match image.off_main {
        Some(off) => println!("main at:        {off:06X} (segment {:04X})", image.seg_main),
        None => println!("main at:        not located"),
    }
    if let Some(ds) = state.reg(Register::Ds) {
        println!("Initial DS:     {ds:04X}");
    }
    println!("Signature file: {}", signature_path(&provenance).display());

    if args.map {
        print_map(&image);
    }
    if args.dump_entry || args.dump_normalized {
        dump_entry_window(&image, args.dump_normalized);
    }

    let library = if args.image_only {
        LibraryContext::empty()
    } else {
        LibraryContext::setup(&provenance).context("loading library data")?
    };

    match library.signatures() {
        Some(sig) => println!("Signatures:     {} keys", sig.num_keys()),
        None => println!("Signatures:     none loaded"),
    }
    match library.prototypes() {
        Some(protos) => println!("Prototypes:     {} functions", protos.len()),
        None => println!("Prototypes:     none loaded ({})", prototype_path().display()),
    }

    if args.stats {
        println!(
            "Image:          {} bytes, entry {:04X}:{:04X}",
            image.len(),
            image.init_cs(),
            image.init_ip()
        );
    }

    if args.very_verbose {
        let report = Report {
            file: args.file.display().to_string(),
            provenance,
            signature_file: signature_path(&provenance).display().to_string(),
            signatures_loaded: library.signatures().is_some(),
            prototypes_loaded: library.prototypes().is_some(),
            off_main: image.off_main,
            seg_main: image.seg_main,
            ds: state.reg(Register::Ds),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

fn print_map(image: &Image) {
    println!("Memory map:");
    println!("  load module:  {} bytes", image.len());
    println!("  entry CS:IP:  {:04X}:{:04X}", image.init_cs(), image.init_ip());
    println!("  entry SS:SP:  {:04X}:{:04X}", image.init_ss(), image.init_sp());
    println!("  start offset: {:06X}", image.start_offset());
}

fn dump_entry_window(image: &Image, normalized: bool) {
    let start = image.start_offset();
    let Some(window) = image.bytes().get(start..(start + PAT_LEN).min(image.len())) else {
        println!("Entry window:   out of image");
        return;
    };
    let mut bytes = window.to_vec();
    if normalized {
        fix_wildcards(&mut bytes);
        println!("Entry window (normalized): {}", hex::encode(&bytes));
    } else {
        println!("Entry window:   {}", hex::encode(&bytes));
    }
}
