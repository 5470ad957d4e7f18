mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};

use cli::{Args, Command};
use nilm_disagg::config::{Config, DEFAULT_CONFIG_FILE};
use nilm_disagg::data::loader::open_source;
use nilm_disagg::{
    ApplianceId, DataStore, Disaggregator, ElecMeter, MeanShare, MeterGroup, ParquetStore,
};

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    debug!("Arguments: {args:?}");

    if let Err(e) = run(args) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::InitConfig { force } => init_config(force),
        Command::Train {
            appliances,
            site,
            building,
            model,
        } => {
            let config = Config::load_or_default(args.config.as_deref())?;
            train(&config, &appliances, &site, building, &model)
        }
        Command::Disaggregate {
            mains,
            model,
            output,
        } => {
            let config = Config::load_or_default(args.config.as_deref())?;
            disaggregate(&config, &mains, &model, &output)
        }
    }
}

fn init_config(force: bool) -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    if path.exists() && !force {
        anyhow::bail!("{DEFAULT_CONFIG_FILE} already exists; pass --force to overwrite");
    }
    std::fs::write(path, Config::default_toml()?)
        .with_context(|| format!("Failed to write {DEFAULT_CONFIG_FILE}"))?;
    info!("Created {DEFAULT_CONFIG_FILE} with default settings");
    Ok(())
}

fn train(
    config: &Config,
    appliances: &[(ApplianceId, PathBuf)],
    site: &[PathBuf],
    building: u32,
    model_path: &Path,
) -> Result<()> {
    let mut group = MeterGroup::default();
    let mut instance = 1;
    for path in site {
        let source = open_source(path, &config.data)
            .with_context(|| format!("opening site meter {}", path.display()))?;
        group.push(ElecMeter::site(building, instance, source));
        instance += 1;
    }
    for (id, path) in appliances {
        let source = open_source(path, &config.data)
            .with_context(|| format!("opening meter for {id} ({})", path.display()))?;
        group.push(ElecMeter::appliance(building, instance, id.clone(), source));
        instance += 1;
    }

    let mut disaggregator = MeanShare::new();
    disaggregator.train(&group).context("training failed")?;
    disaggregator
        .export_model(model_path)
        .with_context(|| format!("writing model to {}", model_path.display()))?;

    for (name, share) in disaggregator.model()?.shares() {
        info!("{name}: {:.1}% of mains", share * 100.0);
    }
    Ok(())
}

fn disaggregate(
    config: &Config,
    mains: &[PathBuf],
    model_path: &Path,
    output: &Path,
) -> Result<()> {
    let mut disaggregator = MeanShare::new();
    disaggregator
        .import_model(model_path)
        .with_context(|| format!("loading model from {}", model_path.display()))?;

    let mut phases = MeterGroup::default();
    for (i, path) in mains.iter().enumerate() {
        let source = open_source(path, &config.data)
            .with_context(|| format!("opening mains {}", path.display()))?;
        phases.push(ElecMeter::site(1, i as u32 + 1, source));
    }

    let mut store = ParquetStore::create(output)
        .with_context(|| format!("creating output directory {}", output.display()))?
        .with_prefix(config.output.key_prefix.clone());

    // Close even when disaggregation fails so the written files stay readable.
    let outcome = disaggregator.disaggregate(&phases, &mut store);
    let n_keys = store.keys().len();
    let closed = store.close();
    if let Err(e) = outcome {
        if let Err(close_err) = closed {
            warn!("finishing output files also failed: {close_err}");
        }
        return Err(anyhow::Error::new(e).context("disaggregation failed"));
    }
    closed.context("finishing output files")?;

    info!("Wrote {n_keys} appliance series to {}", output.display());
    Ok(())
}
