//! Parser for the text permission-map format.
//!
//! ```text
//! # comment
//! 2
//! class file 2
//!     read    r 10
//!     write   w 10
//! class process 1
//!     transition w 5
//! ```

use std::path::Path;
use std::str::FromStr;

use super::{PermDirection, PermissionMap, MAX_WEIGHT, MIN_WEIGHT};
use crate::types::AnalysisError;

/// Error type for permission-map loading.
#[derive(Debug, thiserror::Error)]
pub enum PermMapError {
    /// File could not be read.
    #[error("Cannot read permission map: {0}")]
    Io(#[from] std::io::Error),
    /// The leading class count is missing or not a number.
    #[error("line {line}: expected class count, found '{found}'")]
    BadClassCount {
        /// 1-based line number.
        line: usize,
        /// Offending text.
        found: String,
    },
    /// A class header is malformed.
    #[error("line {line}: malformed class header '{found}'")]
    BadClassHeader {
        /// 1-based line number.
        line: usize,
        /// Offending text.
        found: String,
    },
    /// A permission line is malformed.
    #[error("line {line}: malformed permission entry '{found}'")]
    BadPermission {
        /// 1-based line number.
        line: usize,
        /// Offending text.
        found: String,
    },
    /// A class declared more permissions than it listed, or vice versa.
    #[error("class '{class}' declares {declared} permissions but lists {found}")]
    PermCountMismatch {
        /// Class name.
        class: String,
        /// Declared count.
        declared: usize,
        /// Listed count.
        found: usize,
    },
    /// The file declared more classes than it listed, or vice versa.
    #[error("map declares {declared} classes but lists {found}")]
    ClassCountMismatch {
        /// Declared count.
        declared: usize,
        /// Listed count.
        found: usize,
    },
}

impl From<PermMapError> for AnalysisError {
    fn from(e: PermMapError) -> Self {
        AnalysisError::Configuration(e.to_string())
    }
}

struct OpenClass {
    name: String,
    declared: usize,
    found: usize,
}

impl OpenClass {
    fn close(self) -> Result<(), PermMapError> {
        if self.declared != self.found {
            return Err(PermMapError::PermCountMismatch {
                class: self.name,
                declared: self.declared,
                found: self.found,
            });
        }
        Ok(())
    }
}

/// Parse a permission map from text.
pub fn parse(text: &str) -> Result<PermissionMap, PermMapError> {
    let mut map = PermissionMap::new();
    let mut declared_classes: Option<usize> = None;
    let mut found_classes = 0usize;
    let mut open: Option<OpenClass> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = content.split_whitespace().collect();

        if declared_classes.is_none() {
            let count = tokens
                .first()
                .filter(|_| tokens.len() == 1)
                .and_then(|t| t.parse::<usize>().ok())
                .ok_or_else(|| PermMapError::BadClassCount {
                    line,
                    found: content.to_string(),
                })?;
            declared_classes = Some(count);
            continue;
        }

        if tokens[0] == "class" {
            if let Some(prev) = open.take() {
                prev.close()?;
            }
            if tokens.len() != 3 {
                return Err(PermMapError::BadClassHeader {
                    line,
                    found: content.to_string(),
                });
            }
            let declared = tokens[2].parse::<usize>().map_err(|_| PermMapError::BadClassHeader {
                line,
                found: content.to_string(),
            })?;
            found_classes += 1;
            open = Some(OpenClass {
                name: tokens[1].to_string(),
                declared,
                found: 0,
            });
            continue;
        }

        let bad_perm = || PermMapError::BadPermission {
            line,
            found: content.to_string(),
        };
        let class = open.as_mut().ok_or_else(bad_perm)?;
        if tokens.len() != 3 {
            return Err(bad_perm());
        }
        let direction = PermDirection::from_letter(tokens[1]).ok_or_else(bad_perm)?;
        let weight = tokens[2].parse::<i64>().map_err(|_| bad_perm())?;
        if weight < MIN_WEIGHT as i64 || weight > MAX_WEIGHT as i64 {
            tracing::warn!(
                line,
                class = %class.name,
                perm = tokens[0],
                weight,
                "permission weight out of range, clamping"
            );
        }
        let weight = weight.clamp(MIN_WEIGHT as i64, MAX_WEIGHT as i64) as u32;
        map.insert(class.name.clone(), tokens[0], direction, weight);
        class.found += 1;
    }

    if let Some(last) = open.take() {
        last.close()?;
    }
    let declared = declared_classes.unwrap_or(0);
    if declared != found_classes {
        return Err(PermMapError::ClassCountMismatch {
            declared,
            found: found_classes,
        });
    }

    tracing::debug!(
        classes = found_classes,
        perms = map.len(),
        "parsed permission map"
    );
    Ok(map)
}

impl FromStr for PermissionMap {
    type Err = PermMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl PermissionMap {
    /// Load a permission map from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PermMapError> {
        let text = std::fs::read_to_string(path)?;
        parse(&text)
    }
}
