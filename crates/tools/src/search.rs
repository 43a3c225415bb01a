//! Regex text search over files under a confined path.

use std::path::{Path, PathBuf};

use {
    regex::RegexBuilder,
    serde::{Deserialize, Serialize},
    tracing::debug,
    walkdir::WalkDir,
};

use toolcase_common::{ToolError, confine_path};

pub const DEFAULT_MAX_RESULTS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub pattern: String,
    #[serde(default = "default_search_path")]
    pub path: String,
    /// `None` keeps the pattern case-sensitive; `Some(false)` folds case.
    #[serde(default)]
    pub case_sensitive: Option<bool>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

fn default_search_path() -> String {
    ".".into()
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    /// Relative to the search target where expressible.
    pub path: PathBuf,
    pub line_number: u64,
    pub line: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub ok: bool,
    pub matches: Vec<SearchMatch>,
    pub truncated: bool,
}

/// Search file contents line by line under a confined path. Files that are
/// not valid UTF-8 are skipped, as are files that cannot be opened.
pub fn text(root: &Path, req: &SearchRequest) -> Result<SearchResult, ToolError> {
    if req.pattern.is_empty() {
        return Err(ToolError::InvalidPath(
            "search pattern cannot be empty".into(),
        ));
    }
    let max_results = req.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
    let target = confine_path(root, &req.path)?;
    if !target.exists() {
        return Err(ToolError::NotFound(format!("path not found: {}", req.path)));
    }

    let regex = RegexBuilder::new(&req.pattern)
        .case_insensitive(matches!(req.case_sensitive, Some(false)))
        .build()
        .map_err(|e| ToolError::internal(format!("invalid search pattern: {e}")))?;

    let mut matches = Vec::new();
    let mut truncated = false;

    'files: for entry in WalkDir::new(&target)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            debug!(path = %entry.path().display(), "skipping unreadable or binary file");
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            if !regex.is_match(line) {
                continue;
            }
            if matches.len() >= max_results {
                truncated = true;
                break 'files;
            }
            let rel = entry
                .path()
                .strip_prefix(&target)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path().to_path_buf());
            matches.push(SearchMatch {
                path: rel,
                line_number: idx as u64 + 1,
                line: line.to_string(),
            });
        }
    }

    Ok(SearchResult {
        ok: true,
        matches,
        truncated,
    })
}
