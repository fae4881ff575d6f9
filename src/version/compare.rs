//! Numeric dot-separated version comparison

use serde::{Deserialize, Serialize};

use crate::version::error::VersionParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareResult {
    Greater,
    Less,
    Equal,
    Invalid,
}

/// Parse a version string into its numeric components.
///
/// Every dot-separated component must be a non-empty run of ASCII digits.
///
/// Examples:
/// - "1" -> [1]
/// - "1.2.3" -> [1, 2, 3]
/// - "1.x" -> None
pub fn parse_version(version: &str) -> Option<Vec<u64>> {
    let version = version.trim();
    if version.is_empty() {
        return None;
    }

    version
        .split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            part.parse::<u64>().ok()
        })
        .collect()
}

/// Like [`parse_version`], but for callers that need a concrete version.
pub fn require_version(version: &str) -> Result<Vec<u64>, VersionParseError> {
    parse_version(version).ok_or_else(|| VersionParseError(version.to_string()))
}

/// Compare `a` against `b`.
///
/// Missing trailing components count as zero, so "1.0" equals "1.0.0".
/// Malformed input yields [`CompareResult::Invalid`].
pub fn compare_versions(a: &str, b: &str) -> CompareResult {
    let (Some(left), Some(right)) = (parse_version(a), parse_version(b)) else {
        return CompareResult::Invalid;
    };

    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            std::cmp::Ordering::Greater => return CompareResult::Greater,
            std::cmp::Ordering::Less => return CompareResult::Less,
            std::cmp::Ordering::Equal => {}
        }
    }

    CompareResult::Equal
}
