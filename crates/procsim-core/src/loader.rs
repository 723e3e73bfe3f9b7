//! Loading model descriptions from files.
//!
//! Feature-gated behind `model-loader`. A model is the serde form of
//! [`ModelDescription`]; TOML and JSON documents are accepted. Loading only
//! checks the document shape. Semantic checks happen in
//! [`compile`](crate::compile::compile).

use std::path::Path;

use crate::model::ModelDescription;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a model description.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported model file extension: {0:?}")]
    UnsupportedFormat(String),
    #[error("model has no nodes")]
    Empty,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub fn from_toml_str(text: &str) -> Result<ModelDescription, LoadError> {
    let model: ModelDescription = toml::from_str(text)?;
    non_empty(model)
}

pub fn from_json_str(text: &str) -> Result<ModelDescription, LoadError> {
    let model: ModelDescription = serde_json::from_str(text)?;
    non_empty(model)
}

/// Load a model file, choosing the format by extension (`.toml` or `.json`).
pub fn load_file(path: &Path) -> Result<ModelDescription, LoadError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let text = std::fs::read_to_string(path)?;
    let model = match extension.as_str() {
        "toml" => from_toml_str(&text)?,
        "json" => from_json_str(&text)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };
    tracing::debug!(path = %path.display(), nodes = model.nodes.len(), "model loaded");
    Ok(model)
}

/// Serialize a model back to pretty JSON.
pub fn to_json_string(model: &ModelDescription) -> Result<String, LoadError> {
    Ok(serde_json::to_string_pretty(model)?)
}

fn non_empty(model: ModelDescription) -> Result<ModelDescription, LoadError> {
    if model.nodes.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(model)
}
