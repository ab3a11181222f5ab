use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "vagabond",
    version,
    about = "Provision and manage local Vagrant instances"
)]
pub struct Cli {
    /// Path to config file (default: ~/.config/vagabond/vagabond.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational messages
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable coloured instance prefixes
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import the image if needed, allocate an address and provision an instance
    Create {
        /// Instance name, used as the output prefix
        #[arg(long)]
        name: String,

        /// Image name (default from config)
        #[arg(long)]
        image: Option<String>,

        /// Memory in MB (default from config)
        #[arg(long)]
        ram: Option<u32>,

        /// Number of CPUs (default from config)
        #[arg(long)]
        cpus: Option<u32>,

        /// Public key installed for root (default: ~/.ssh/id_rsa.pub if present)
        #[arg(long)]
        ssh_key: Option<PathBuf>,

        /// Preferred address; the next free one is used if it is taken
        #[arg(long)]
        ip: Option<Ipv4Addr>,
    },

    /// Boot existing instances
    Start {
        /// Instance addresses
        #[arg(required = true)]
        addresses: Vec<Ipv4Addr>,
    },

    /// Halt running instances
    Stop {
        /// Instance addresses
        #[arg(required = true)]
        addresses: Vec<Ipv4Addr>,
    },

    /// Force-destroy instances and remove their state
    Destroy {
        /// Instance addresses
        #[arg(required = true)]
        addresses: Vec<Ipv4Addr>,
    },

    /// List instances in the state directory
    List,

    /// Show images the tool already has and the ones it can import
    Images,
}
