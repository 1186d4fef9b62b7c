//! geocodeur - command-line interface for the geocodeur library
//!
//! Usage examples
//! --------------
//!
//! - Build the index from prepared feature files
//!   $ geocodeur create division.parquet road.parquet water.parquet
//!
//! - Geocode a query, optionally restricted to classes
//!   $ geocodeur query "kerkstraat amsterdam" --limit 5
//!   $ geocodeur query "maas" --class water,division --geom
//!
//! - Show a feature by id
//!   $ geocodeur lookup 42
//!
//! - Bounded edit-distance lookups
//!   $ geocodeur tree insert kerkstraat kerkplein
//!   $ geocodeur tree search kerkstrat 2
//!
//! Results are printed as JSON on stdout; logs go to stderr.
mod args;

use clap::Parser;
use geocodeur::{GeocodeOptions, Geocodeur, GeocoderConfig};
use tracing::info;

use crate::args::{CliArgs, Commands, TreeCommands};

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    geocodeur::init_logging(args.log_level)?;

    let config = match &args.config {
        Some(path) => GeocoderConfig::load(path)?,
        None => GeocoderConfig::from_env()?,
    };
    let default_limit = config.default_limit;
    let geocodeur = Geocodeur::new(config)?;

    match args.command {
        Commands::Create { sources } => {
            let report = geocodeur.build_index(sources.as_slice())?;
            info!(elapsed = ?report.elapsed, "Index created");
            print_json(&report)?;
        }

        Commands::Query {
            query,
            limit,
            classes,
            geom,
            threshold,
        } => {
            let mut options = GeocodeOptions::new()
                .limit(limit.unwrap_or(default_limit))
                .classes(classes);
            if geom {
                options = options.with_geometry();
            }
            if let Some(threshold) = threshold {
                options = options.fuzzy_threshold(threshold);
            }
            print_json(&geocodeur.geocode(&query, &options)?)?;
        }

        Commands::Lookup { id, geom } => match geocodeur.lookup(id, geom)? {
            Some(feature) => print_json(&feature)?,
            None => anyhow::bail!("No feature with id {id}"),
        },

        Commands::Tree { command } => match command {
            TreeCommands::Insert { values } => {
                for value in &values {
                    geocodeur.tree_insert(value)?;
                }
                info!(inserted = values.len(), "Values inserted");
            }
            TreeCommands::Search { query, radius } => {
                print_json(&geocodeur.tree_search(&query, radius)?)?;
            }
        },
    }

    geocodeur.shutdown();
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
