use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI arguments for the geocodeur binary
#[derive(Debug, Parser)]
#[command(
    name = "geocodeur",
    version,
    about = "Build and query a typo-tolerant geocoding index"
)]
pub struct CliArgs {
    /// JSON configuration file (default: $GEOCODEUR_CONFIG_PATH, then built-in defaults)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long = "log-level", global = true, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Rebuild the index from prepared feature files (Parquet or CSV)
    Create {
        /// Feature files, one per class
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },

    /// Geocode a free-text query
    Query {
        query: String,

        /// Maximum number of results (1-100)
        #[arg(short = 'l', long)]
        limit: Option<usize>,

        /// Restrict to these classes; repeat or comma-separate
        #[arg(long = "class", value_delimiter = ',')]
        classes: Vec<String>,

        /// Include GeoJSON geometries
        #[arg(long)]
        geom: bool,

        /// Fuzzy similarity threshold for this query
        #[arg(short = 't', long)]
        threshold: Option<f64>,
    },

    /// Show one feature by id
    Lookup {
        id: u64,

        /// Include the GeoJSON geometry
        #[arg(long)]
        geom: bool,
    },

    /// Edit-distance lookups over a persistent string set
    Tree {
        #[command(subcommand)]
        command: TreeCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum TreeCommands {
    /// Add values to the set
    Insert {
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Values within RADIUS edits of QUERY
    Search { query: String, radius: usize },
}
