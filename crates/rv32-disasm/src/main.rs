use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

use rv32_rs::disasm::fmt_word;
use rv32_rs::isa::rv32::Rv32Decoder;
use tracing_subscriber::EnvFilter;

use rv32_disasm::{load, read_u32, read_u8, Image};

#[derive(Parser, Debug)]
#[command(author, version, about = "RV32IM disassembler CLI", long_about = None)]
struct Cli {
    /// Load address for raw binaries (ignored for ELF input)
    #[arg(long, default_value_t = 0u32)]
    base: u32,
    /// Skip N bytes at start of a raw file before loading
    #[arg(long, default_value_t = 0usize)]
    skip: usize,
    /// Limit bytes loaded from a raw file (default: to EOF after --skip)
    #[arg(long)]
    len: Option<usize>,
    /// Output format: text or json
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Input binary path (raw or ELF)
    #[arg(value_name = "BINFILE")]
    input: String,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List loaded segments
    Sections,
    /// Disassemble a range [start, end) in bytes
    Range {
        /// Start address (hex or dec)
        start: String,
        /// End address (hex or dec, exclusive)
        end: String,
        /// Show instruction bytes
        #[arg(long)]
        show_bytes: bool,
        /// Write output to file instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
struct Line {
    addr: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<String>,
    text: String,
}

fn parse_u32(s: &str) -> Result<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Ok(u32::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse::<u32>()?)
    }
}

/// Linear sweep over [start, end); stops at the first unmapped word.
fn disassemble(img: &Image, start: u32, end: u32, show_bytes: bool) -> Vec<Line> {
    let dec = Rv32Decoder::new();
    let mut lines = Vec::new();
    let mut pc = start;
    while pc < end {
        let Some(raw) = read_u32(img, pc) else {
            lines.push(Line { addr: pc, bytes: None, text: "<oob>".into() });
            break;
        };
        let bytes = show_bytes.then(|| {
            (0..4)
                .map(|i| format!("{:02x}", read_u8(img, pc + i).unwrap_or(0)))
                .collect::<Vec<_>>()
                .join(" ")
        });
        lines.push(Line { addr: pc, bytes, text: fmt_word(&dec, raw) });
        pc = pc.wrapping_add(4);
        if pc == 0 {
            break;
        }
    }
    lines
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let img = load(Path::new(&cli.input), cli.base, cli.skip, cli.len)?;

    match cli.cmd {
        Command::Sections => match cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&img)?),
            OutputFormat::Text => {
                println!(
                    "{:<10} {:<10} {:<10} {:<6} {:<6}",
                    "name", "start", "end", "perms", "kind"
                );
                for s in &img.segments {
                    let end = s.base.wrapping_add(s.size);
                    println!(
                        "{:<10} {:#010x} {end:#010x} {:<6} {:<6}",
                        s.name, s.base, s.perms, s.kind
                    );
                }
                if let Some(entry) = img.entry {
                    println!("entry {entry:#010x}");
                }
            }
        },
        Command::Range { start, end, show_bytes, out } => {
            let start = parse_u32(&start)?;
            let end = parse_u32(&end)?;
            anyhow::ensure!(end >= start, "end must be >= start");
            let lines = disassemble(&img, start, end, show_bytes);

            let buf = match cli.format {
                OutputFormat::Json => serde_json::to_string_pretty(&lines)? + "\n",
                OutputFormat::Text => {
                    let mut buf = String::new();
                    for l in &lines {
                        match &l.bytes {
                            Some(b) => writeln!(buf, "{:#010x}: {b}   {}", l.addr, l.text)?,
                            None => writeln!(buf, "{:#010x}: {}", l.addr, l.text)?,
                        }
                    }
                    buf
                }
            };
            if let Some(path) = out {
                std::fs::write(path, buf)?;
            } else {
                print!("{buf}");
            }
        }
    }
    Ok(())
}
