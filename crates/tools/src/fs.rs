//! Sandboxed filesystem tools: windowed read, write with parent creation,
//! and a non-recursive directory listing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use toolcase_common::{ToolError, confine_path};

/// Listing stops after this many entries unless the request raises it.
pub const DEFAULT_MAX_ENTRIES: usize = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct ReadRequest {
    pub path: String,
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadResult {
    pub ok: bool,
    pub path: PathBuf,
    /// Full on-disk size, even when `content` is a truncated window.
    pub size: u64,
    pub content: String,
    pub truncated: bool,
}

/// Read up to `max_bytes` from a file under the sandbox root. Non-UTF-8
/// content is decoded lossily rather than rejected.
pub fn read(root: &Path, req: &ReadRequest, default_max_bytes: usize) -> Result<ReadResult, ToolError> {
    let max_bytes = req.max_bytes.unwrap_or(default_max_bytes);
    let path = confine_path(root, &req.path)?;
    if !path.exists() {
        return Err(ToolError::NotFound(format!("file not found: {}", req.path)));
    }
    if path.is_dir() {
        return Err(ToolError::InvalidPath(format!(
            "expected a file but got directory: {}",
            req.path
        )));
    }

    let size = path.metadata()?.len();
    let data = {
        use std::io::Read;
        let mut buf = Vec::with_capacity(max_bytes.min(size as usize));
        std::fs::File::open(&path)?
            .take(max_bytes as u64)
            .read_to_end(&mut buf)?;
        buf
    };

    Ok(ReadResult {
        ok: true,
        path,
        size,
        content: String::from_utf8_lossy(&data).into_owned(),
        truncated: size > max_bytes as u64,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub mode: WriteMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteResult {
    pub ok: bool,
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Write UTF-8 content to a file under the sandbox root, creating parent
/// directories as needed.
pub fn write(root: &Path, req: &WriteRequest) -> Result<WriteResult, ToolError> {
    let path = confine_path(root, &req.path)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match req.mode {
        WriteMode::Overwrite => std::fs::write(&path, &req.content)?,
        WriteMode::Append => {
            use std::io::Write as _;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(req.content.as_bytes())?;
        },
    }
    Ok(WriteResult {
        ok: true,
        path,
        bytes_written: req.content.len() as u64,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListRequest {
    #[serde(default = "default_list_path")]
    pub path: String,
    #[serde(default)]
    pub max_entries: Option<usize>,
}

fn default_list_path() -> String {
    ".".into()
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub name: String,
    /// Path relative to the sandbox root where expressible.
    pub path: PathBuf,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub ok: bool,
    pub path: PathBuf,
    pub entries: Vec<ListEntry>,
    pub truncated: bool,
}

/// Non-recursive directory listing, sorted by name.
pub fn list(root: &Path, req: &ListRequest) -> Result<ListResult, ToolError> {
    let max_entries = req.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES);
    let path = confine_path(root, &req.path)?;
    if !path.exists() {
        return Err(ToolError::NotFound(format!(
            "directory not found: {}",
            req.path
        )));
    }
    if !path.is_dir() {
        return Err(ToolError::InvalidPath(format!(
            "expected a directory but got file: {}",
            req.path
        )));
    }

    let canonical_root = root.canonicalize()?;
    let mut names: Vec<_> = std::fs::read_dir(&path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    names.sort();

    let truncated = names.len() > max_entries;
    names.truncate(max_entries);

    let entries = names
        .into_iter()
        .map(|entry_path| {
            let meta = entry_path.metadata().ok();
            let kind = match meta {
                Some(ref m) if m.is_dir() => "dir",
                Some(ref m) if m.is_file() => "file",
                _ => "other",
            };
            let rel = entry_path
                .strip_prefix(&canonical_root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry_path.clone());
            ListEntry {
                name: entry_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: rel,
                kind,
                size: meta.and_then(|m| m.is_file().then(|| m.len())),
            }
        })
        .collect();

    Ok(ListResult {
        ok: true,
        path,
        entries,
        truncated,
    })
}
