use clap::Parser;

fn main() {
    let args = elf2mz::cli::Args::parse();
    if let Err(err) = elf2mz::cli::validate_args(&args) {
        eprintln!("elf2mz: error: {err}");
        std::process::exit(2);
    }
    if let Err(err) = elf2mz::run(args) {
        eprintln!("elf2mz: error: {err}");
        std::process::exit(1);
    }
}
