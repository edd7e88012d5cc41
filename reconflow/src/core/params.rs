//! Run parameters and the request body sent to start a node.

use super::{NodeId, NodeOutput};
use crate::errors::{ReconflowError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Date format of `expectedRunDate`.
pub const RUN_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parameters shared by every node of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParameters {
    /// Business date of the run, `YYYY-MM-DD`.
    pub expected_run_date: String,
    /// Path of the input configuration file.
    pub input_config_file_path: String,
    /// Glob selecting input configuration files.
    pub input_config_file_pattern: String,
    /// Root directory of the input files.
    pub root_file_dir: String,
    /// Target environment name.
    pub run_env: String,
    /// Scratch directory for intermediate files.
    pub temp_file_path: String,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            expected_run_date: "2024-01-01".to_string(),
            input_config_file_path: "/path/to/config".to_string(),
            input_config_file_pattern: "*.json".to_string(),
            root_file_dir: "/data".to_string(),
            run_env: "production".to_string(),
            temp_file_path: "/tmp".to_string(),
        }
    }
}

impl RunParameters {
    /// Loads parameters from a JSON file and validates them.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let params: Self = serde_json::from_str(&raw)?;
        params.validate()?;
        Ok(params)
    }

    /// Sets the run date.
    #[must_use]
    pub fn with_run_date(mut self, date: impl Into<String>) -> Self {
        self.expected_run_date = date.into();
        self
    }

    /// Sets the run environment.
    #[must_use]
    pub fn with_run_env(mut self, env: impl Into<String>) -> Self {
        self.run_env = env.into();
        self
    }

    /// Parsed run date.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` if the date is not `YYYY-MM-DD`.
    pub fn run_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(self.expected_run_date.trim(), RUN_DATE_FORMAT).map_err(|_| {
            ReconflowError::InvalidParameters(format!(
                "expectedRunDate '{}' is not a YYYY-MM-DD date",
                self.expected_run_date
            ))
        })
    }

    /// Rejects empty fields and malformed dates.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("expectedRunDate", &self.expected_run_date),
            ("inputConfigFilePath", &self.input_config_file_path),
            ("inputConfigFilePattern", &self.input_config_file_pattern),
            ("rootFileDir", &self.root_file_dir),
            ("runEnv", &self.run_env),
            ("tempFilePath", &self.temp_file_path),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ReconflowError::InvalidParameters(format!("{name} must not be empty")));
        }
        self.run_date()?;
        Ok(())
    }
}

/// Body of `POST /run/{node}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Validated run parameters.
    pub parameters: RunParameters,
    /// Clean outputs of completed upstream nodes.
    #[serde(default)]
    pub previous_outputs: BTreeMap<NodeId, Value>,
    /// Node-specific parameters, forwarded verbatim.
    #[serde(default)]
    pub custom_params: Map<String, Value>,
}

impl RunRequest {
    /// Creates a request with no upstream outputs.
    #[must_use]
    pub fn new(parameters: RunParameters) -> Self {
        Self {
            parameters,
            previous_outputs: BTreeMap::new(),
            custom_params: Map::new(),
        }
    }

    /// Adds an upstream output unless it carries the failure sentinel.
    ///
    /// Returns whether the output was merged.
    pub fn merge_output(&mut self, node: NodeId, output: &NodeOutput) -> bool {
        if output.is_failure() {
            return false;
        }
        self.previous_outputs.insert(node, output.value().clone());
        true
    }

    /// Sets the node-specific parameters.
    #[must_use]
    pub fn with_custom_params(mut self, params: Map<String, Value>) -> Self {
        self.custom_params = params;
        self
    }
}
