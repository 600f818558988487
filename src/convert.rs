use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::Args;
use crate::format::elf::parse_elf;
use crate::layout::{plan_rom_layout, SegmentLayout};
use crate::relocs::{collect_table_relocations, process_dynamic_stream};
use crate::resolver::{classify_sections, extract_info_symbols};
use crate::writer::{build_image, publish};

/// Conversion settings distilled from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub verbose: bool,
    /// Tiny-model flag; accepted for compatibility, the header
    /// arithmetic is the same either way.
    pub tiny: bool,
    pub rom: Option<RomSegments>,
}

/// ROMable placement: the header goes to `header_seg:0` and the data
/// segment to `data_seg:0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomSegments {
    pub header_seg: u16,
    pub data_seg: u16,
}

impl Options {
    #[must_use]
    pub fn from_args(args: &Args) -> Options {
        let rom = match (args.aout_seg, args.data_seg) {
            (Some(header_seg), Some(data_seg)) => Some(RomSegments {
                header_seg,
                data_seg,
            }),
            _ => None,
        };
        Options {
            verbose: args.verbose,
            tiny: args.tiny,
            rom,
        }
    }
}

/// Converts one flat-segment ELF image into an MZ executable image.
/// Pure with respect to the filesystem; `run` handles the I/O around
/// it.
///
/// # Errors
/// Any malformed-input condition aborts the conversion; nothing of the
/// output is produced.
pub fn convert(input: &[u8], options: &Options) -> Result<Vec<u8>> {
    let elf = parse_elf(input)?;
    let sections = classify_sections(&elf, options.verbose)?;
    let info = extract_info_symbols(&sections.symbols);
    let table = collect_table_relocations(&sections, options.verbose);
    let dynamic = process_dynamic_stream(&sections, options.verbose)?;

    let layout = match options.rom {
        Some(rom) => plan_rom_layout(&sections, rom.header_seg, rom.data_seg)?,
        None => SegmentLayout::default(),
    };

    build_image(
        &sections,
        &info,
        &table,
        &dynamic,
        &layout,
        options.rom.is_some(),
    )
}

/// Reads the input file, runs the conversion, and atomically publishes
/// the output.
///
/// # Errors
/// Propagates every conversion and I/O failure; a failed run leaves no
/// file at the output path.
pub fn run(args: Args) -> Result<()> {
    let options = Options::from_args(&args);

    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("cannot open input file `{}'", args.input))?;
    let image = convert(&bytes, &options)?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_name(&args.input));
    publish(Path::new(&output), &image, options.verbose)?;

    if options.verbose {
        println!("wrote output: {output}");
    }
    Ok(())
}

fn default_output_name(input: &str) -> String {
    Path::new(input)
        .with_extension("exe")
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::default_output_name;
    use pretty_assertions::assert_eq;

    #[test]
    fn derives_output_name_from_input() {
        assert_eq!(default_output_name("prog.elf"), "prog.exe");
        assert_eq!(default_output_name("dir/prog"), "dir/prog.exe");
    }
}
