//! CLI for the MSI-coherent multi-core processor simulator.
//!
//! Loads one or more program files (each a newline-separated list of
//! `opcode arg1 arg2 arg3` decimal integers), runs the simulation to
//! completion, and dumps the resulting statistics to stdout.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use rvsim_msi_core::config::Config;
use rvsim_msi_core::sim::{ProgramLine, RunOutcome, System};

#[derive(Parser, Debug)]
#[command(
    name = "sim",
    author,
    version,
    about = "Cycle-level multi-core processor simulator (MSI coherence, round-robin scheduling)"
)]
struct Cli {
    /// Program files to load, one hilillo per file.
    #[arg(short, long, num_args = 1.., conflicts_with = "dir")]
    files: Vec<PathBuf>,

    /// Directory whose files (non-recursively, sorted by name) are each
    /// loaded as one program.
    #[arg(short, long, conflicts_with = "files")]
    dir: Option<PathBuf>,

    /// Increase log verbosity; repeat for more (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Optional JSON configuration file overriding the default geometry and
    /// timing constants.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let program_files = match collect_program_files(&cli) {
        Ok(files) => files,
        Err(err) => {
            error!(%err, "failed to resolve program inputs");
            return ExitCode::FAILURE;
        }
    };

    if program_files.is_empty() {
        error!("no program files given; pass -f/--files or -d/--dir");
        return ExitCode::FAILURE;
    }

    let mut system = System::new(config);
    for path in &program_files {
        let lines = match parse_program_file(path) {
            Ok(lines) => lines,
            Err(err) => {
                error!(path = %path.display(), %err, "failed to parse program file");
                return ExitCode::FAILURE;
            }
        };
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        if let Err(err) = system.load_program(name, &lines) {
            error!(path = %path.display(), %err, "failed to load program");
            return ExitCode::FAILURE;
        }
    }

    info!(programs = program_files.len(), "starting simulation");
    let outcome = system.run();
    outcome.report.print();
    print_final_state(&outcome);

    ExitCode::SUCCESS
}

/// Prints the PCB table, per-core register/cache state, and final memory
/// contents backing `report.print()`'s counters.
fn print_final_state(outcome: &RunOutcome) {
    println!("==========================================================");
    println!("FINAL STATE");
    println!("==========================================================");
    println!("finished PCBs:");
    for pcb in &outcome.finished {
        println!("  {pcb}");
    }
    for core in &outcome.cores {
        print!("{core}");
    }
    print!("{}", outcome.inst_memory);
    print!("{}", outcome.data_memory);
    println!("==========================================================");
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&Path>) -> Result<Config, String> {
    match path {
        None => Ok(Config::default()),
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
            serde_json::from_str(&text).map_err(|e| format!("parsing {}: {e}", path.display()))
        }
    }
}

fn collect_program_files(cli: &Cli) -> Result<Vec<PathBuf>, String> {
    if !cli.files.is_empty() {
        return Ok(cli.files.clone());
    }
    if let Some(dir) = &cli.dir {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| format!("reading {}: {e}", dir.display()))?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        entries.sort();
        return Ok(entries);
    }
    Ok(Vec::new())
}

/// Parses a program file: one instruction per line, each line four
/// whitespace-separated decimal integers `(opcode, arg1, arg2, arg3)`.
fn parse_program_file(path: &Path) -> Result<Vec<ProgramLine>, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
    let mut lines = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(format!("line {}: expected 4 fields, found {}", idx + 1, fields.len()));
        }
        let op: u32 = fields[0].parse().map_err(|_| format!("line {}: bad opcode", idx + 1))?;
        let a1: u32 = fields[1].parse().map_err(|_| format!("line {}: bad arg1", idx + 1))?;
        let a2: u32 = fields[2].parse().map_err(|_| format!("line {}: bad arg2", idx + 1))?;
        let a3: i32 = fields[3].parse().map_err(|_| format!("line {}: bad arg3", idx + 1))?;
        lines.push((op, a1, a2, a3));
    }
    Ok(lines)
}
