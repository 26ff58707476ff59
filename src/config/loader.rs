// file: src/config/loader.rs
// version: 2.0.0
// guid: d4e5f6g7-h8i9-0123-4567-890123defghi

//! Cluster spec loading with environment variable substitution

use super::ClusterSpec;
use crate::Result;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
    env_vars: HashMap<String, String>,
}

impl ConfigLoader {
    /// Create a new config loader seeded from the process environment
    pub fn new() -> Self {
        Self {
            env_vars: std::env::vars().collect(),
        }
    }

    /// Load a cluster spec from a YAML file
    pub fn load_cluster_spec<P: AsRef<Path>>(&self, path: P) -> Result<ClusterSpec> {
        let content = fs::read_to_string(&path).map_err(|e| {
            crate::error::ProvisionError::config(format!(
                "Failed to read cluster spec {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        self.parse_cluster_spec(&content)
    }

    /// Parse a cluster spec from YAML text, assigning node roles and validating
    pub fn parse_cluster_spec(&self, content: &str) -> Result<ClusterSpec> {
        let expanded = self.expand_env_vars(content)?;
        let mut spec: ClusterSpec = serde_yaml::from_str(&expanded)?;
        spec.assign_roles();
        spec.validate()?;
        Ok(spec)
    }

    /// Expand `${VAR}` placeholders. Every referenced variable must be set.
    fn expand_env_vars(&self, content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| {
            crate::error::ProvisionError::config(format!("Invalid regex pattern: {}", e))
        })?;

        let mut missing_vars = Vec::new();
        let expanded = re.replace_all(content, |cap: &regex::Captures<'_>| {
            match self.env_vars.get(&cap[1]) {
                Some(value) => value.clone(),
                None => {
                    missing_vars.push(cap[1].to_string());
                    String::new()
                }
            }
        });

        if !missing_vars.is_empty() {
            missing_vars.dedup();
            return Err(crate::error::ProvisionError::config(format!(
                "Missing environment variables: {}",
                missing_vars.join(", ")
            )));
        }

        Ok(expanded.into_owned())
    }

    /// Set environment variable for substitution
    pub fn set_env_var(&mut self, key: String, value: String) {
        self.env_vars.insert(key, value);
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
