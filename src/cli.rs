use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Enables detailed progress output.
    #[clap(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub(crate) command: CorepackCommand,
}

#[derive(Debug, Subcommand)]
pub enum CorepackCommand {
    /// Installs package managers into the cache.
    /// Without specs, installs the current project's pinned tool.
    Install {
        /// Update the global pins as well; also accepts an archive
        /// produced by `corepack pack`.
        #[clap(short = 'g', long)]
        global: bool,
        /// Specs like `yarn@1.22.22`, `pnpm@^9`, or `npm@latest`.
        specs: Vec<String>,
    },
    /// Bundles package managers and their cache entries into a
    /// redistributable archive.
    Pack {
        /// Output path of the archive.
        #[clap(short = 'o', long, default_value = "corepack.tgz")]
        output: PathBuf,
        /// Specs to bundle; defaults to the project's pinned tool.
        specs: Vec<String>,
    },
    /// Resolves a spec and pins it in the project manifest.
    Use {
        /// Spec like `pnpm@9.0.0` or `yarn@^4`.
        spec: String,
    },
    /// Re-resolves the project's pin to the newest version in the same
    /// major line and rewrites the manifest.
    Up,
    /// Creates the per-binary entry points routing tool invocations
    /// through this shim.
    Enable {
        /// Where to place the entry points. Defaults to the directory
        /// of the current executable.
        #[clap(long)]
        install_directory: Option<PathBuf>,
        /// Tools to cover; defaults to all of them.
        tools: Vec<String>,
    },
    /// Removes the entry points `enable` created.
    Disable {
        #[clap(long)]
        install_directory: Option<PathBuf>,
        tools: Vec<String>,
    },
    /// Cache maintenance.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    // Shim mode: `corepack <tool>[@<spec>] <args...>`.
    #[command(external_subcommand)]
    Tool(Vec<String>),
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Removes everything under the cache root.
    Clean,
}
