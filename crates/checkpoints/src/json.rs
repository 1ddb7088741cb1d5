//! Checkpoint lists shipped as JSON files next to the node.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HashLine {
    pub height: u64,
    pub hash: String,
    #[serde(default)]
    pub difficulty: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HashFile {
    #[serde(default)]
    hashlines: Vec<HashLine>,
}

#[derive(Debug)]
pub enum JsonError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for JsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonError::Io(err) => write!(f, "failed to read checkpoints file: {err}"),
            JsonError::Parse(err) => write!(f, "invalid checkpoints file: {err}"),
        }
    }
}

impl std::error::Error for JsonError {}

impl From<std::io::Error> for JsonError {
    fn from(err: std::io::Error) -> Self {
        JsonError::Io(err)
    }
}

impl From<serde_json::Error> for JsonError {
    fn from(err: serde_json::Error) -> Self {
        JsonError::Parse(err)
    }
}

/// Reads `{"hashlines": [...]}` from `path`. A missing file yields no entries.
pub fn load_checkpoints_from_json(path: &Path) -> Result<Vec<HashLine>, JsonError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            sispopd_log::log_debug!(
                target: "checkpoints",
                "checkpoints file {} not found",
                path.display()
            );
            return Ok(Vec::new());
        }
        Err(err) => return Err(err.into()),
    };
    let file: HashFile = serde_json::from_slice(&bytes)?;
    Ok(file.hashlines)
}
