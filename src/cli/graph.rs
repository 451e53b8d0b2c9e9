// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Graph command - visualize the stage graph

use miette::Result;
use std::path::PathBuf;

use super::validate::load_configuration;
use super::GraphFormat;
use crate::topology::{StageGraph, TopologyGenerator};

/// Placeholder bucket; the graph does not depend on it
const GRAPH_BUCKET: &str = "artifacts";

/// Run the graph command
pub async fn run(config_path: PathBuf, format: GraphFormat, _verbose: bool) -> Result<()> {
    let config = load_configuration(&config_path)?;
    let topology = TopologyGenerator::generate(&config, GRAPH_BUCKET)?;
    let graph = StageGraph::build(&topology)?;

    let output = match format {
        GraphFormat::Text => graph.to_text()?,
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Mermaid => graph.to_mermaid()?,
    };

    print!("{}", output);

    Ok(())
}
