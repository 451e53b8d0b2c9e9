// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Workflow runs: result documents, aggregation, metadata and the local runner

mod aggregator;
mod documents;
mod executor;
mod metadata;

pub use aggregator::{RunAggregator, RunStatus, RunSummary, StageOutcome, StageSummary};
pub use documents::ResultStore;
pub use executor::{PipelineRunner, RunOptions, RunReport};
pub use metadata::{metadata_key, WorkflowMetadata};
