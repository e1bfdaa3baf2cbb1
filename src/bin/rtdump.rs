//! Prints every occupied cell of a routing table file, one per line:
//! `<id hex> <ip>:<port> <quality>`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use mldht::constants::CELL_SIZE;
use mldht::dht::RoutingCell;

#[derive(Parser, Debug)]
#[command(name = "rtdump")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Routing table file.
    file: PathBuf,
}

fn format_cell(cell: &RoutingCell) -> String {
    format!(
        "{} {} {}",
        hex::encode(cell.contact.id.as_bytes()),
        cell.contact.addr,
        cell.quality
    )
}

fn dump(input: impl Read, mut out: impl Write) -> Result<usize> {
    let mut input = BufReader::new(input);
    let mut raw = [0u8; CELL_SIZE];
    let mut count = 0;

    loop {
        match input.read_exact(&mut raw) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("failed to read routing table"),
        }

        let Some(cell) = RoutingCell::from_bytes(&raw) else {
            continue;
        };
        if cell.is_empty() {
            continue;
        }

        writeln!(out, "{}", format_cell(&cell))?;
        count += 1;
    }

    Ok(count)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let file = File::open(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    dump(file, &mut out)?;
    out.flush()?;

    Ok(())
}
