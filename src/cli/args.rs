//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::enums::{Backend, Mode};

/// Photo booth capture core: DSLR or webcam, stills, boomerangs and video
#[derive(Parser, Debug)]
#[command(name = "darkroom-booth")]
#[command(version, about = "Photo booth capture from a tethered DSLR or webcam", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one capture session and save the result
    Capture {
        /// What to capture
        #[arg(long, short, default_value = "picture")]
        mode: Mode,

        /// Camera backend (default: from config)
        #[arg(long, short)]
        backend: Option<Backend>,

        /// Do not save the artifact
        #[arg(long)]
        no_save: bool,
    },
    /// List USB devices, e.g. to check the camera is attached
    ListUsb {
        /// Only show devices whose description contains this vendor name
        #[arg(long)]
        vendor: Option<String>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}
