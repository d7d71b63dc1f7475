use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage::full_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Archive,
    Dump,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Archive => "zip",
            ArtifactKind::Dump => "sql",
        }
    }
}

/// A file produced on the remote host, waiting to be shipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub remote_path: String,
    pub name: String,
    pub size: u64,
}

/// Lower-case ASCII alphanumerics; every other run of characters becomes one `-`.
pub fn sanitize_label(label: &str) -> String {
    let mut sanitized = String::with_capacity(label.len());
    let mut pending_dash = false;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !sanitized.is_empty() {
                sanitized.push('-');
            }
            pending_dash = false;
            sanitized.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if sanitized.is_empty() {
        "backup".to_string()
    } else {
        sanitized
    }
}

/// Prefix shared by every artifact of a label; rotation lists by it.
pub fn retention_prefix(label: &str) -> String {
    format!("{}_", sanitize_label(label))
}

/// `{label}_{YYYYMMDD}_{HHmmss}.{ext}`.
pub fn artifact_name(label: &str, kind: ArtifactKind, at: DateTime<Utc>) -> String {
    format!(
        "{}{}.{}",
        retention_prefix(label),
        at.format("%Y%m%d_%H%M%S"),
        kind.extension()
    )
}

/// The artifacts of one label and kind under one store path.
///
/// Rotation and naming only ever look at names that belong here, so a
/// `.sql` dump never rotates out a `.zip` archive sharing its label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    prefix: String,
    kind: ArtifactKind,
}

impl Namespace {
    pub fn new(store_path: Option<&str>, label: &str, kind: ArtifactKind) -> Self {
        Self {
            prefix: full_path(store_path, &retention_prefix(label)),
            kind,
        }
    }

    /// Listing prefix at the destination.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// True for `{prefix}{YYYYMMDD}_{HHmmss}.{ext}` and nothing else.
    pub fn contains(&self, name: &str) -> bool {
        let Some(rest) = name.strip_prefix(&self.prefix) else {
            return false;
        };
        let Some(stamp) = rest
            .strip_suffix(self.kind.extension())
            .and_then(|rest| rest.strip_suffix('.'))
        else {
            return false;
        };
        let bytes = stamp.as_bytes();
        bytes.len() == 15
            && bytes.iter().enumerate().all(|(i, b)| {
                if i == 8 {
                    *b == b'_'
                } else {
                    b.is_ascii_digit()
                }
            })
    }
}
