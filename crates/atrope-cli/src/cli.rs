use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "atrope", about = "Synchronize a local image catalog with signed HEPiX image lists", version)]
pub struct Cli {
    #[arg(long, global = true, help = "YAML file holding list source configuration")]
    pub sources_path: Option<PathBuf>,

    #[arg(long, global = true, help = "Directory holding CA certificates used for SMIME verification")]
    pub ca_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Directory used to cache downloaded images")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "YAML file holding dispatcher/client settings")]
    pub settings_path: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured image list sources
    Index,
    /// Fetch and verify one list, or all configured lists
    Verify {
        /// Name of a single list to verify; omit to verify all
        list: Option<String>,
        /// Also print the raw fetched contents
        #[arg(long)]
        contents: bool,
    },
    /// Download images for all valid lists and reconcile the cache
    Cache,
    /// Reconcile the cache and dispatch images to configured catalogs
    Sync,
    /// Add a new list source to the configuration file
    Add {
        /// Name of the new list source; prompted interactively if omitted
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        endorser_dn: Option<String>,
        #[arg(long)]
        endorser_ca: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Print build version information
    Version,
}
