//! File reading for experiment bundles and configs (optionally gzip compressed).

use crate::{HyperintError, Result};
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub fn read_bytes_maybe_gzip(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(HyperintError::ModelLoad(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let is_gzip = path.extension().and_then(|e| e.to_str()) == Some("gz");
    if !is_gzip {
        return std::fs::read(path)
            .map_err(|e| HyperintError::ModelLoad(format!("Failed to read file: {}", e)));
    }

    let file = File::open(path)
        .map_err(|e| HyperintError::ModelLoad(format!("Failed to open file: {}", e)))?;
    let mut decoder = GzDecoder::new(file);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| HyperintError::ModelLoad(format!("Failed to decode gzip: {}", e)))?;
    Ok(out)
}

pub fn read_string_maybe_gzip(path: &Path) -> Result<String> {
    let bytes = read_bytes_maybe_gzip(path)?;
    String::from_utf8(bytes)
        .map_err(|e| HyperintError::ModelLoad(format!("Failed to decode UTF-8: {}", e)))
}

/// Deserialize a JSON document from `path` (`.json` or `.json.gz`).
pub fn read_json_maybe_gzip<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = read_string_maybe_gzip(path)?;
    serde_json::from_str(&text).map_err(|e| {
        HyperintError::ModelLoad(format!("Failed to parse {}: {}", path.display(), e))
    })
}
