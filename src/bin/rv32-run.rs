use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rv32_rs::{assemble, elf, link, Access, AddressSpace, HostOs, Machine, Reg, RunConfig};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Assemble (or load) and run an RV32IM program on the rv32-rs interpreter"
)]
struct Opts {
    /// JSON run configuration; flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Instruction budget before the watchdog stops the run
    #[arg(short, long)]
    watchdog: Option<u64>,
    /// Load address for assembly sources
    #[arg(short, long)]
    base: Option<u32>,
    /// Assembly source or ELF executable
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn load_elf(bytes: &[u8], cfg: &RunConfig) -> Result<Machine> {
    let img = elf::read(bytes)?;
    let mut space = AddressSpace::new();
    img.load(&mut space)?;
    let mut machine = Machine::new(space, img.entry, cfg.cpu);
    if cfg.link.stack_size > 0 && cfg.cpu.initial_sp.is_none() {
        let bottom = machine
            .space
            .allocate_anywhere(cfg.link.stack_size, Access::READ | Access::WRITE)?;
        machine
            .cpu
            .regs
            .set_u(Reg::SP, bottom.wrapping_add(cfg.link.stack_size));
    }
    Ok(machine)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let mut cfg = match &opts.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            RunConfig::from_json(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => RunConfig::default(),
    };
    if let Some(w) = opts.watchdog {
        cfg.cpu.watchdog = w;
    }
    if let Some(b) = opts.base {
        cfg.link.base = b;
    }

    let bytes = std::fs::read(&opts.input)
        .with_context(|| format!("reading {}", opts.input.display()))?;
    let mut machine = if elf::is_elf(&bytes) {
        load_elf(&bytes, &cfg)?
    } else {
        let text = String::from_utf8(bytes).context("source is not UTF-8")?;
        let linked = link(assemble(&text, cfg.link.base), &cfg.link)?;
        for d in &linked.diagnostics {
            eprintln!("{}: {d}", opts.input.display());
        }
        if !linked.is_clean() {
            bail!("{} error(s), not running", linked.diagnostics.len());
        }
        Machine::from_linked(linked, cfg.cpu)
    };

    let mut os = HostOs::new();
    let outcome = machine.run(&mut os)?;
    eprintln!("{outcome:?}");
    std::process::exit(outcome.exit_code());
}
