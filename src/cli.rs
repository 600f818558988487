use clap::Parser;

fn parse_u16_with_hex(input: &str) -> Result<u16, String> {
    let s = input.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex value '{input}': {e}"))
    } else {
        s.parse::<u32>()
            .map_err(|e| format!("invalid decimal value '{input}': {e}"))
    }?;
    u16::try_from(parsed).map_err(|_| format!("invalid integer argument '{input}': exceeds 0xffff"))
}

#[derive(Debug, Parser)]
#[command(name = "elf2mz", version, about = "convert ELF file into MS-DOS MZ executable")]
pub struct Args {
    #[arg(short = 'o', long = "output", help = "output file (default: INPUT with .exe extension)")]
    pub output: Option<String>,

    #[arg(short = 'v', long = "verbose", help = "print verbose debug information")]
    pub verbose: bool,

    #[arg(long = "tiny", help = "output tiny model executable")]
    pub tiny: bool,

    #[arg(
        long = "aout-seg",
        value_parser = parse_u16_with_hex,
        help = "output ROMable executable, place header in ROM at SEG:0"
    )]
    pub aout_seg: Option<u16>,

    #[arg(
        long = "data-seg",
        value_parser = parse_u16_with_hex,
        help = "output ROMable executable, place data segment at SEG:0"
    )]
    pub data_seg: Option<u16>,

    #[arg(
        long = "total-data",
        value_parser = parse_u16_with_hex,
        help = "(deprecated) set total data segment size"
    )]
    pub total_data: Option<u16>,

    #[arg(
        long = "chmem",
        value_parser = parse_u16_with_hex,
        help = "(deprecated) set maximum non-static data size"
    )]
    pub chmem: Option<u16>,

    #[arg(long = "stack", value_parser = parse_u16_with_hex, help = "set maximum stack size")]
    pub stack: Option<u16>,

    #[arg(long = "heap", value_parser = parse_u16_with_hex, help = "set maximum heap size")]
    pub heap: Option<u16>,

    #[arg(value_name = "INPUT")]
    pub input: String,
}

/// Cross-option rules clap cannot express: the ROMable segment pair
/// must come together, and the legacy sizing knobs exclude each other.
///
/// # Errors
/// A human-readable message naming the offending combination.
pub fn validate_args(args: &Args) -> Result<(), String> {
    if args.aout_seg.is_some() != args.data_seg.is_some() {
        return Err("cannot specify only --aout-seg or only --data-seg".to_string());
    }

    if args.total_data.is_some() {
        if args.chmem.is_some() {
            return Err("cannot specify both --total-data and --chmem".to_string());
        }
        if args.stack.is_some() {
            return Err("cannot specify both --total-data and --stack".to_string());
        }
        if args.heap.is_some() {
            return Err("cannot specify both --total-data and --heap".to_string());
        }
    }

    if args.chmem.is_some() {
        if args.stack.is_some() {
            return Err("cannot specify both --chmem and --stack".to_string());
        }
        if args.heap.is_some() {
            return Err("cannot specify both --chmem and --heap".to_string());
        }
    }

    Ok(())
}
