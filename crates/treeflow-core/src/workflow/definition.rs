//! Workflow definition files.
//!
//! Reads and writes `WorkflowConfig` as YAML (`.yaml`/`.yml`) or JSON
//! (`.json`). Only deserialization happens here; structural validation is
//! done by `GraphModel::build`.

use std::path::Path;

use treeflow_types::workflow::WorkflowConfig;

use super::error::ConfigError;

/// On-disk encoding of a definition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}

impl DefinitionFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("yaml" | "yml") => Ok(DefinitionFormat::Yaml),
            Some("json") => Ok(DefinitionFormat::Json),
            _ => Err(ConfigError::Parse(format!(
                "unsupported workflow file extension: {}",
                path.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a `WorkflowConfig`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowConfig, ConfigError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Parse a JSON string into a `WorkflowConfig`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowConfig, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Serialize a `WorkflowConfig` to a YAML string.
pub fn serialize_workflow_yaml(config: &WorkflowConfig) -> Result<String, ConfigError> {
    serde_yaml_ng::to_string(config).map_err(|e| ConfigError::Serialize(e.to_string()))
}

/// Serialize a `WorkflowConfig` to pretty-printed JSON.
pub fn serialize_workflow_json(config: &WorkflowConfig) -> Result<String, ConfigError> {
    serde_json::to_string_pretty(config).map_err(|e| ConfigError::Serialize(e.to_string()))
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition, choosing the parser by file extension.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowConfig, ConfigError> {
    let format = DefinitionFormat::from_path(path)?;
    let content = std::fs::read_to_string(path)?;
    let config = match format {
        DefinitionFormat::Yaml => parse_workflow_yaml(&content)?,
        DefinitionFormat::Json => parse_workflow_json(&content)?,
    };
    tracing::debug!(
        path = %path.display(),
        workflow_id = %config.id,
        nodes = config.nodes.len(),
        edges = config.edges.len(),
        "loaded workflow definition"
    );
    Ok(config)
}

/// Save a workflow definition in the format implied by the extension.
///
/// Creates parent directories if they don't exist.
pub fn save_workflow_file(path: &Path, config: &WorkflowConfig) -> Result<(), ConfigError> {
    let content = match DefinitionFormat::from_path(path)? {
        DefinitionFormat::Yaml => serialize_workflow_yaml(config)?,
        DefinitionFormat::Json => serialize_workflow_json(config)?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
