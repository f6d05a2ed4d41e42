use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rv32_rs::{assemble, elf, link, LinkConfig};

#[derive(Parser, Debug)]
#[command(name = "rv32-asm", author, version, about = "Tiny RV32IM assembler")]
struct Opts {
    /// Input assembly file (one statement per line)
    #[arg(short, long)]
    input: PathBuf,
    /// Output file
    #[arg(short, long)]
    output: PathBuf,
    /// Load address (page aligned)
    #[arg(long, default_value_t = 0u32)]
    start: u32,
    /// Entry symbol recorded in the ELF header
    #[arg(long, default_value = "_start")]
    entry: String,
    #[arg(long, value_enum, default_value_t = Emit::Elf)]
    emit: Emit,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Emit {
    Elf,
    Raw,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let text = fs::read_to_string(&opts.input)
        .with_context(|| format!("reading {}", opts.input.display()))?;

    let cfg = LinkConfig {
        base: opts.start,
        stack_size: 0,
        entry_symbol: opts.entry.clone(),
        ..LinkConfig::default()
    };
    let linked = link(assemble(&text, cfg.base), &cfg)?;
    if !linked.is_clean() {
        for d in &linked.diagnostics {
            eprintln!("{}: {d}", opts.input.display());
        }
        bail!("{} error(s)", linked.diagnostics.len());
    }

    let bin = match opts.emit {
        Emit::Raw => linked.image().to_vec(),
        Emit::Elf => elf::write(linked.image(), linked.base, linked.entry, cfg.text_access),
    };
    fs::write(&opts.output, &bin).with_context(|| format!("writing {}", opts.output.display()))?;
    Ok(())
}
