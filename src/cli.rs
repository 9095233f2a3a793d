use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use thiserror::Error;

use parc::{ArchiveError, ArchiveLayout, BackendKind};

#[derive(Parser)]
#[command(name = "psopack")]
#[command(about = "Inspect, repack and merge device object archives")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Lists the resources and shaders of an archive
    Info {
        archive: PathBuf,
    },

    /// Checks every backend reference of an archive
    Validate {
        archive: PathBuf,
    },

    /// Removes backend data
    Strip {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Backend to remove, may be repeated
        #[arg(short, long = "backend", required = true)]
        backends: Vec<BackendKind>,
    },

    /// Copies backend data from a donor archive with the same resources
    Append {
        input: PathBuf,

        donor: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Backend to copy, may be repeated
        #[arg(short, long = "backend", required = true)]
        backends: Vec<BackendKind>,
    },

    /// Merges archives, the first archive wins on conflicts
    Merge {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,

        /// Overrides the configured layout
        #[arg(short, long)]
        layout: Option<LayoutArg>,
    },

    /// Rewrites an archive in another layout
    Convert {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long)]
        layout: LayoutArg,
    },
}

#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LayoutArg {
    Stream,
    Blocks,
}

impl From<LayoutArg> for ArchiveLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Stream => ArchiveLayout::Stream,
            LayoutArg::Blocks => ArchiveLayout::Blocks,
        }
    }
}

const DEFAULT_CONFIG: &str = r#"
    layout = "stream"
"#;

// Configuration
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Archives must carry this content version, merged output gets it
    pub content_version: Option<u32>,

    pub layout: LayoutArg,

    pub build_id: Option<String>,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Config, CliError> {
        let text = match path {
            Some(path) => std::fs::read_to_string(path)?,
            None => DEFAULT_CONFIG.to_string(),
        };
        Ok(toml::from_str(&text)?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            content_version: None,
            layout: LayoutArg::Stream,
            build_id: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),
    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },
    #[error("{0} failed validation")]
    Invalid(PathBuf),
}
