//! Prints the contents of a raw stackmap section.
//!
//! The input is the section's bytes exactly as they sit in the object file, e.g. as extracted
//! with `objcopy -O binary --only-section=.llvm_stackmaps`.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::debug;
use stkmap_parse::{BigEndian, ByteOrder, LittleEndian, StackMapSection};

/// Dump a stackmap section.
#[derive(Parser)]
struct Options {
    /// The raw section to read. If this is `-` or not provided then stdin is used as input.
    input: Option<PathBuf>,

    /// Decode a section produced for a big endian target.
    #[arg(long)]
    big_endian: bool,

    /// Start decoding this many bytes into the input.
    #[arg(long, default_value = "0", value_name = "N")]
    skip: usize,

    /// Print the section as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Only print the record for this function-relative instruction offset, with its
    /// locations resolved.
    #[arg(long, value_name = "OFFSET")]
    offset: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::init();
    let options = Options::parse();

    let data = read_input(&options)?;
    if options.skip > data.len() {
        bail!("cannot skip {} bytes of a {} byte input", options.skip, data.len());
    }

    let section = if options.big_endian {
        parse::<BigEndian>(&data, options.skip)?
    } else {
        parse::<LittleEndian>(&data, options.skip)?
    };

    match options.offset {
        Some(offset) => print_record(&section, offset, options.json),
        None if options.json => {
            println!("{}", serde_json::to_string_pretty(&section)?);
            Ok(())
        }
        None => {
            print!("{}", section);
            Ok(())
        }
    }
}

fn read_input(options: &Options) -> Result<Vec<u8>> {
    match &options.input {
        Some(path) if path.to_str() != Some("-") => {
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
        }
        _ => {
            let mut data = Vec::new();
            std::io::stdin()
                .read_to_end(&mut data)
                .context("failed to read stdin")?;
            Ok(data)
        }
    }
}

fn parse<BO: ByteOrder>(data: &[u8], skip: usize) -> Result<StackMapSection> {
    let mut pos = skip;
    let section = stkmap_parse::Parser::<BO>::parse_from(data, &mut pos)
        .with_context(|| format!("failed to parse stackmap section at offset {}", skip))?;
    if pos < data.len() {
        debug!("{} trailing bytes after section", data.len() - pos);
    }
    Ok(section)
}

fn print_record(section: &StackMapSection, offset: u32, json: bool) -> Result<()> {
    let record = match section.record_for_offset(offset) {
        Some(record) => record,
        None => bail!("no record for instruction offset {:#x}", offset),
    };
    let pointers = section.resolve_locations(record)?;

    if json {
        let value = serde_json::json!({
            "record": record,
            "pointers": pointers,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!(
        "record {:#x} at offset {:#x}",
        record.patch_point_id, record.instruction_offset
    );
    for (idx, (loc, ptr)) in record.locations.iter().zip(&pointers).enumerate() {
        println!("  {}: {} (size {}) => {:?}", idx, loc.kind, loc.size, ptr);
    }
    Ok(())
}
