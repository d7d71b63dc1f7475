use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

/// Represents an object in storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageObject {
    /// Key (path) of the object
    pub key: String,
    /// Size of the object in bytes
    pub size: u64,
    /// Last modified time
    pub last_modified: Option<SystemTime>,
    /// ETag of the object
    pub etag: Option<String>,
}

/// Custom metadata for objects
pub type Metadata = HashMap<String, String>;

/// Content type for an artifact file name.
pub fn content_type_for(file_name: &str) -> Option<&'static str> {
    match std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
    {
        Some("zip") => Some("application/zip"),
        Some("sql") => Some("application/sql"),
        Some("gz") => Some("application/gzip"),
        _ => None,
    }
}
