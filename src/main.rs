mod cli;
mod execute;

use clap::Parser;

use crate::cli::Cli;

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let code = match run(argv) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            1
        }
    };
    std::process::exit(code);
}

fn run(argv: Vec<String>) -> anyhow::Result<i32> {
    // Invoked through an `enable` entry point: argv[0] is one of the
    // managed binary names and the whole argv belongs to the tool.
    if let Some(first) = argv.first() {
        let command = std::path::Path::new(first)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if corepack::config::find_by_binary(&command).is_some() {
            return execute::run_shim(&command, None, argv[1..].to_vec());
        }
    }
    let cli = Cli::parse();
    execute::execute(cli)
}
