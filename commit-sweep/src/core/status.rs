//! Parser for NUL-delimited `git status --porcelain=v1 -z` output.
//!
//! Records are `XY<space>PATH\0`. When either half of the code is `R` or `C`
//! the record is followed by a second NUL-terminated field holding the prior
//! path. Paths are never quoted or escaped in this format.

use anyhow::{Result, anyhow};

use crate::core::types::ChangeKind;

/// Unmerged (conflicted) `XY` codes.
const UNMERGED_CODES: [&str; 7] = ["DD", "AU", "UD", "UA", "DU", "AA", "UU"];

/// One parsed status record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
    pub orig_path: Option<String>,
    /// False when git reported a path that is not valid UTF-8.
    pub utf8: bool,
}

impl StatusEntry {
    pub fn is_unmerged(&self) -> bool {
        UNMERGED_CODES.contains(&self.code.as_str())
    }

    pub fn kind(&self) -> ChangeKind {
        ChangeKind::from_code(&self.code)
    }
}

/// Parse raw `-z` status bytes into entries.
pub fn parse_status_z(raw: &[u8]) -> Result<Vec<StatusEntry>> {
    let mut entries = Vec::new();
    let mut fields = raw.split(|b| *b == 0).peekable();

    while let Some(record) = fields.next() {
        if record.is_empty() {
            continue;
        }
        if record.len() < 4 || record[2] != b' ' {
            return Err(anyhow!(
                "unexpected status record: '{}'",
                String::from_utf8_lossy(record)
            ));
        }
        let code = String::from_utf8_lossy(&record[..2]).to_string();
        let (path, mut utf8) = decode_path(&record[3..]);

        let orig_path = if code.contains('R') || code.contains('C') {
            let orig = fields
                .next()
                .filter(|field| !field.is_empty())
                .ok_or_else(|| anyhow!("rename record for '{path}' is missing its source path"))?;
            let (orig, orig_utf8) = decode_path(orig);
            utf8 &= orig_utf8;
            Some(orig)
        } else {
            None
        };

        entries.push(StatusEntry {
            code,
            path,
            orig_path,
            utf8,
        });
    }

    Ok(entries)
}

fn decode_path(bytes: &[u8]) -> (String, bool) {
    match std::str::from_utf8(bytes) {
        Ok(path) => (path.to_string(), true),
        Err(_) => (String::from_utf8_lossy(bytes).to_string(), false),
    }
}
