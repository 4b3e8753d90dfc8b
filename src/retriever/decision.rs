//! Parsing of decision responses.
//!
//! Models wrap their JSON in prose more often than not, so the first
//! balanced `{...}` object is carved out of the response text before it is
//! handed to serde.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Directory- and file-level decision: candidate ids, most probable first.
#[derive(Debug, Deserialize)]
pub struct RankedChoices {
    pub ids: Vec<i64>,
}

/// Class-level decision: a method id, or -1 for "none of these".
#[derive(Debug, Deserialize)]
pub struct SingleChoice {
    pub id: i64,
}

/// Extract the first balanced top-level JSON object from `text`.
///
/// Braces inside string literals don't count; escaped quotes are honored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

pub fn parse_ranked(text: &str) -> Result<RankedChoices> {
    let json = extract_json_object(text)
        .context("Decision response contains no JSON object")?;
    serde_json::from_str(json).context("Decision response is not a ranked id list")
}

pub fn parse_single(text: &str) -> Result<SingleChoice> {
    let json = extract_json_object(text)
        .context("Decision response contains no JSON object")?;
    serde_json::from_str(json).context("Decision response is not a single id")
}

/// Drop repeated ids, keeping the first occurrence of each.
pub fn dedup_ids(ids: Vec<i64>) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
