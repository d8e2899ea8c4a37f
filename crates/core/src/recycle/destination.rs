//! Destination path computation.

use std::fmt;
use std::path::{Component, Path, PathBuf, Prefix};

use serde::{Deserialize, Serialize};

use super::error::RecycleError;

/// Segment used when a file has no (usable) category.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Why a file is being recycled. Becomes the first directory level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecycleReason {
    /// Not referenced by any torrent.
    Orphaned,
    /// Content of a torrent deleted from the client.
    Unregistered,
}

impl RecycleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecycleReason::Orphaned => "orphaned",
            RecycleReason::Unregistered => "unregistered",
        }
    }
}

impl fmt::Display for RecycleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduce a category to a single safe path segment.
///
/// Anything other than ASCII alphanumerics, `-` and `_` becomes `_`, so
/// separators and `..` can never escape the recycle bin root. An empty result
/// falls back to [`UNCATEGORIZED`].
pub fn sanitize_category(category: Option<&str>) -> String {
    let raw = category.unwrap_or("").trim();
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        UNCATEGORIZED.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Turn an absolute source path into a relative path that preserves its
/// segments. The root is dropped and a Windows drive `C:` becomes `C_`.
pub fn translate_source(source: &Path) -> Result<PathBuf, RecycleError> {
    if !source.is_absolute() {
        return Err(RecycleError::UnsafeSource {
            path: source.to_path_buf(),
        });
    }

    let mut relative = PathBuf::new();
    for component in source.components() {
        match component {
            Component::Prefix(prefix) => match prefix.kind() {
                Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => {
                    relative.push(format!("{}_", letter as char));
                }
                _ => {
                    let raw = prefix.as_os_str().to_string_lossy();
                    let segment: String = raw
                        .chars()
                        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                        .collect();
                    relative.push(segment.trim_matches('_'));
                }
            },
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                return Err(RecycleError::UnsafeSource {
                    path: source.to_path_buf(),
                });
            }
            Component::Normal(segment) => relative.push(segment),
        }
    }

    if relative.file_name().is_none() {
        return Err(RecycleError::UnsafeSource {
            path: source.to_path_buf(),
        });
    }
    Ok(relative)
}

/// Insert `suffix` between the file stem and its extension.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}_{}", stem, suffix),
    };
    path.with_file_name(name)
}
