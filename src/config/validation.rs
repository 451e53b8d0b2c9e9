// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Configuration validation
//!
//! Structural checks applied to a parsed configuration before any stage runs.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::config::Configuration;

/// Keys that suggest a secret was committed into the configuration
const CREDENTIAL_MARKERS: &[&str] = &[
    "aws_secret_access_key",
    "aws_access_key_id",
    "aws_session_token",
    "secret_key",
    "secret",
    "password",
    "token",
    "api_key",
    "private_key",
];

fn env_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap())
}

fn region_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d+$").unwrap())
}

fn access_key_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(AKIA|ASIA)[0-9A-Z]{16}\b").unwrap())
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a parsed configuration
    pub fn validate(config: &Configuration) -> ValidationResult {
        let mut result = ValidationResult::new();

        if config.version.trim().is_empty() {
            result.add_error("Configuration version is empty");
        }

        if config.build.commands.is_empty() {
            result.add_warning("Build has no commands; the build stage will only publish artifacts");
        }
        for (i, command) in config.build.commands.iter().enumerate() {
            if command.trim().is_empty() {
                result.add_error(&format!("Build command #{} is empty", i + 1));
            }
        }

        if config.environments.is_empty() {
            result.add_error("Configuration has no environments defined");
        }

        let mut seen_names = HashSet::new();
        for env in &config.environments {
            if !seen_names.insert(env.name.as_str()) {
                result.add_error(&format!("Duplicate environment name: '{}'", env.name));
            }
            Self::validate_environment(env, &mut result);
        }

        result
    }

    /// Validate raw YAML text: credential scan plus structural checks
    pub fn validate_raw(raw: &str) -> ValidationResult {
        let mut result = ValidationResult::new();

        match serde_yaml::from_str::<serde_yaml::Value>(raw) {
            Ok(value) => Self::scan_for_credentials(&value, "", &mut result),
            Err(e) => {
                result.add_error(&format!("Configuration is not valid YAML: {}", e));
                return result;
            }
        }

        match Configuration::from_yaml(raw) {
            Ok(config) => result.merge(Self::validate(&config)),
            Err(e) => result.add_error(&e.to_string()),
        }

        result
    }

    fn validate_environment(env: &crate::config::Environment, result: &mut ValidationResult) {
        if !env_name_pattern().is_match(&env.name) {
            result.add_error(&format!(
                "Environment name '{}' must use lowercase letters, digits and '-'",
                env.name
            ));
        }

        if env.account.len() != 12 || !env.account.chars().all(|c| c.is_ascii_digit()) {
            result.add_error(&format!(
                "Environment '{}': account '{}' must be exactly 12 digits",
                env.name, env.account
            ));
        }

        if !region_pattern().is_match(&env.region) {
            result.add_error(&format!(
                "Environment '{}': region '{}' is not a valid region name",
                env.name, env.region
            ));
        }

        if env.stacks.is_empty() {
            result.add_error(&format!("Environment '{}' has no stacks", env.name));
        }

        let mut seen_stacks = HashSet::new();
        for stack in &env.stacks {
            if stack.name.trim().is_empty() {
                result.add_error(&format!("Environment '{}': stack name is empty", env.name));
            } else if !seen_stacks.insert(stack.name.as_str()) {
                result.add_error(&format!(
                    "Environment '{}': duplicate stack name '{}'",
                    env.name, stack.name
                ));
            }
        }

        if let Some(tests) = &env.tests {
            if tests.commands.is_empty() {
                result.add_warning(&format!(
                    "Environment '{}': tests declared without commands",
                    env.name
                ));
            }
            for (i, command) in tests.commands.iter().enumerate() {
                if command.trim().is_empty() {
                    result.add_error(&format!(
                        "Environment '{}': test command #{} is empty",
                        env.name,
                        i + 1
                    ));
                }
            }
        }
    }

    fn scan_for_credentials(value: &serde_yaml::Value, path: &str, result: &mut ValidationResult) {
        match value {
            serde_yaml::Value::Mapping(map) => {
                for (key, child) in map {
                    let key = key.as_str().unwrap_or_default();
                    let child_path = if path.is_empty() {
                        key.to_string()
                    } else {
                        format!("{}.{}", path, key)
                    };
                    let lowered = key.to_ascii_lowercase();
                    if CREDENTIAL_MARKERS.iter().any(|m| lowered.contains(m)) {
                        result.add_warning(&format!(
                            "'{}' looks like an embedded credential; use cross-account roles instead",
                            child_path
                        ));
                    }
                    Self::scan_for_credentials(child, &child_path, result);
                }
            }
            serde_yaml::Value::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    Self::scan_for_credentials(item, &format!("{}[{}]", path, i), result);
                }
            }
            serde_yaml::Value::String(s) if access_key_pattern().is_match(s) => {
                result.add_warning(&format!("'{}' contains what looks like an access key", path));
            }
            _ => {}
        }
    }
}

/// Result of configuration validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
