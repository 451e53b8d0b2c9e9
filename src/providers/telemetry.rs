// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Metrics, notifications and the default schema validator

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::{MetricsSink, Notifier, SchemaValidator};
use crate::config::{ConfigValidator, Configuration};
use crate::errors::{AphexError, AphexResult};

/// Metrics and notifications written as structured log events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

#[async_trait]
impl MetricsSink for TracingTelemetry {
    async fn emit_metric(
        &self,
        name: &str,
        value: f64,
        dimensions: &BTreeMap<String, String>,
    ) -> AphexResult<()> {
        tracing::info!(metric = name, value, dimensions = ?dimensions, "metric");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TracingTelemetry {
    async fn send_notification(&self, channel: &str, message: &str) -> AphexResult<()> {
        tracing::info!(channel, "{}", message);
        Ok(())
    }
}

/// Emit a metric, logging instead of failing when the sink errors
pub async fn emit_metric(
    sink: &dyn MetricsSink,
    name: &str,
    value: f64,
    dimensions: &[(&str, &str)],
) {
    let dimensions: BTreeMap<String, String> = dimensions
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    if let Err(e) = sink.emit_metric(name, value, &dimensions).await {
        tracing::warn!("Failed to emit metric {}: {}", name, e);
    }
}

/// Send a notification, logging instead of failing when delivery errors
pub async fn notify(notifier: &dyn Notifier, channel: &str, message: &str) {
    if let Err(e) = notifier.send_notification(channel, message).await {
        tracing::warn!("Failed to send notification to {}: {}", channel, e);
    }
}

/// Structural validation: parse plus [`ConfigValidator`] rules
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralSchema;

impl SchemaValidator for StructuralSchema {
    fn validate_config(&self, raw: &str) -> AphexResult<Configuration> {
        let result = ConfigValidator::validate_raw(raw);

        for warning in &result.warnings {
            tracing::warn!("{}", warning);
        }

        if !result.is_valid() {
            return Err(AphexError::ConfigurationValidation {
                errors: result.errors,
            });
        }

        Configuration::from_yaml(raw)
    }
}
