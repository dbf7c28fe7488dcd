mod cfg;
mod cli;
mod defuse;
mod driver;
mod element;
mod errors;
mod export;
mod json;
mod lower;
mod pdg;
mod scope;
mod utils;

use crate::driver::Driver;
use crate::errors::PdgResult;
use crate::utils::Settings;
use clap::Parser;
use cli::{Cli, GraphType};
use console::style;
use std::time::Instant;
use tracing_subscriber::fmt::time;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

fn init_tracing() {
    let fmt_layer = fmt::layer()
        .pretty()
        .with_writer(std::io::stderr)
        .with_timer(time::UtcTime::rfc_3339());

    Registry::default()
        .with(EnvFilter::from_default_env())
        .with(fmt_layer)
        .init();
}

fn main() -> PdgResult<()> {
    let now = Instant::now();
    init_tracing();

    tracing::debug!("CLI starting up");
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())?;
    let source = std::fs::read_to_string(&cli.file_path)?;
    let driver = Driver::new(settings);

    match cli.graph_type {
        GraphType::Ddg => {
            let unit = driver.get_ddg(&source)?;
            let document = json::ddg_document(&unit);
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        GraphType::Cfg => {
            let unit = driver.get_cfg(&source)?;
            for (method, cfg) in &unit.cfgs {
                println!("// {}", unit.store.get(*method).text);
                println!("{}", export::cfg_dot(&unit.store, cfg));
            }
        }
        GraphType::Pdg => {
            let unit = driver.get_pdg(&source)?;
            for (method, pdg) in &unit.pdgs {
                println!("// {}", unit.store.get(*method).text);
                println!("{}", export::pdg_dot(&unit.store, pdg));
            }
        }
    }

    eprintln!(
        "{} in {:.3}s.",
        style("Finished").green().bold(),
        now.elapsed().as_secs_f32()
    );
    Ok(())
}
