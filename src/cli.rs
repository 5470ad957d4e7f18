//! Command-line interface argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nilm_disagg::ApplianceId;

/// nilm-disagg - split whole-house power readings into per-appliance estimates
///
/// Examples:
///   nilm-disagg train --appliance fridge_1=fridge.parquet --appliance kettle_1=kettle.csv --model model.json
///   nilm-disagg disaggregate --mains mains.parquet --model model.json --output out/
///   nilm-disagg init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, uses nilm-disagg.toml in the current directory when present
    #[arg(short, long, global = true, value_name = "FILE", env = "NILM_DISAGG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Learn a model from appliance meters and save it
    Train {
        /// Appliance meter file, as ID=FILE (e.g. fridge_1=fridge.parquet)
        #[arg(
            short,
            long = "appliance",
            value_name = "ID=FILE",
            value_parser = parse_appliance_file,
            required = true
        )]
        appliances: Vec<(ApplianceId, PathBuf)>,

        /// Site meter file; may be repeated
        #[arg(long, value_name = "FILE")]
        site: Vec<PathBuf>,

        /// Building number recorded on the meters
        #[arg(long, default_value = "1")]
        building: u32,

        /// Where to write the trained model
        #[arg(short, long, value_name = "FILE")]
        model: PathBuf,
    },

    /// Disaggregate mains with a saved model into a Parquet directory
    Disaggregate {
        /// Mains file; repeat once per phase to sum a multi-phase supply
        #[arg(long = "mains", value_name = "FILE", required = true)]
        mains: Vec<PathBuf>,

        /// Model written by `train`
        #[arg(short, long, value_name = "FILE")]
        model: PathBuf,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
    },

    /// Write a default nilm-disagg.toml
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn parse_appliance_file(s: &str) -> Result<(ApplianceId, PathBuf), String> {
    let (id, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID=FILE, got '{s}'"))?;
    let id: ApplianceId = id.trim().parse().map_err(|e| format!("{e}"))?;
    if path.trim().is_empty() {
        return Err(format!("missing file for appliance '{id}'"));
    }
    Ok((id, PathBuf::from(path.trim())))
}
