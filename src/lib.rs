// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! # aphex - self-describing continuous-delivery pipeline
//!
//! `aphex` compiles a declarative pipeline configuration into a workflow
//! topology and executes its stages against one exact commit.
//!
//! ## Features
//!
//! - **Topology generation** - build, pipeline self-update, then deploy and
//!   test per environment, rendered as a workflow-engine manifest
//! - **Commit pinning** - every stage checks out and verifies the same SHA
//! - **Ordered stack deployment** - fresh synthesis per stack, halting at the
//!   first failure with diagnostics
//! - **Cross-account deployment** - scoped temporary credentials per stage
//!
//! ## Quick Start
//!
//! ```bash
//! # Create a starter configuration
//! aphex init
//!
//! # Check it and look at the stage graph
//! aphex validate
//! aphex graph --format mermaid
//!
//! # Run every stage locally against one commit
//! aphex run --commit-sha <sha> --repo-url <url>
//! ```

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod errors;
pub mod providers;
pub mod run;
pub mod settings;
pub mod stages;
pub mod topology;

// Re-export commonly used types
pub use config::{Configuration, Environment, RevisionRef};
pub use errors::{AphexError, AphexResult};
pub use run::{PipelineRunner, RunOptions};
pub use settings::Settings;
pub use stages::{StageContext, StageResult};
pub use topology::{TopologyGenerator, WorkflowTopology};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
