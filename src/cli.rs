use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::driver::GraphKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphType {
    /// Data dependency graph, printed as JSON
    Ddg,
    /// Control flow graph, printed as GraphViz dot
    Cfg,
    /// Full program dependence graph, printed as GraphViz dot
    Pdg,
}

impl From<GraphType> for GraphKind {
    fn from(value: GraphType) -> Self {
        match value {
            GraphType::Ddg => GraphKind::Ddg,
            GraphType::Cfg => GraphKind::Cfg,
            GraphType::Pdg => GraphKind::Pdg,
        }
    }
}

#[derive(Parser)]
#[command(name = "pdgraph")]
#[command(about = "Extract dependence graphs from Java compilation units")]
#[command(version)]
pub struct Cli {
    /// Graph to compute and print
    #[arg(short = 't', long = "type", value_enum, default_value = "ddg")]
    pub graph_type: GraphType,

    /// Path to the compilation unit to analyze
    #[arg(short = 'f', long = "filePath")]
    pub file_path: PathBuf,

    /// TOML file overriding the built-in analysis settings and rule tables
    #[arg(long)]
    pub config: Option<PathBuf>,
}
