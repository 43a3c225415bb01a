//! Archive tools: pack a confined directory into a `.tar.gz` and unpack one,
//! with escape validation on every extracted member.

use std::path::{Component, Path, PathBuf};

use {
    flate2::{Compression, read::GzDecoder, write::GzEncoder},
    serde::{Deserialize, Serialize},
    tracing::debug,
    walkdir::WalkDir,
};

use toolcase_common::{ToolError, confine_path};

#[derive(Debug, Clone, Deserialize)]
pub struct PackRequest {
    /// Directory to archive, relative to the sandbox root.
    pub src: String,
    /// Destination `.tar.gz` path, relative to the sandbox root.
    pub dest: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackResult {
    pub ok: bool,
    pub path: PathBuf,
    /// Number of files written into the archive.
    pub count: u64,
}

pub fn pack(root: &Path, req: &PackRequest) -> Result<PackResult, ToolError> {
    let src = confine_path(root, &req.src)?;
    if !src.exists() {
        return Err(ToolError::NotFound(format!(
            "source path not found: {}",
            req.src
        )));
    }
    if !src.is_dir() {
        return Err(ToolError::InvalidPath(format!(
            "expected a directory but got file: {}",
            req.src
        )));
    }

    let dest = confine_path(root, &req.dest)?;
    if dest.exists() && !req.overwrite {
        return Err(ToolError::PermissionDenied(format!(
            "destination already exists: {}",
            req.dest
        )));
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(&dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut count = 0u64;
    for entry in WalkDir::new(&src)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        // Entries are stored relative to the packed directory.
        let rel = entry
            .path()
            .strip_prefix(&src)
            .map_err(|e| ToolError::internal(format!("path outside pack source: {e}")))?;
        builder.append_path_with_name(entry.path(), rel)?;
        count += 1;
    }
    builder.into_inner()?.finish()?;

    debug!(path = %dest.display(), count, "archive packed");
    Ok(PackResult {
        ok: true,
        path: dest,
        count,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnpackRequest {
    /// `.tar.gz` archive path, relative to the sandbox root.
    pub src: String,
    /// Destination directory, relative to the sandbox root.
    pub dest: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnpackResult {
    pub ok: bool,
    pub path: PathBuf,
    pub count: u64,
}

pub fn unpack(root: &Path, req: &UnpackRequest) -> Result<UnpackResult, ToolError> {
    let src = confine_path(root, &req.src)?;
    if !src.exists() {
        return Err(ToolError::NotFound(format!(
            "archive not found: {}",
            req.src
        )));
    }
    let dest = confine_path(root, &req.dest)?;
    std::fs::create_dir_all(&dest)?;

    let file = std::fs::File::open(&src)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut count = 0u64;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let member = entry.path()?.into_owned();
        // Absolute members or members with `..` would land outside dest.
        if member.is_absolute()
            || member
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(ToolError::InvalidPath(format!(
                "archive member escapes destination: {}",
                member.display()
            )));
        }

        let target = dest.join(&member);
        if target.exists() && !req.overwrite {
            return Err(ToolError::PermissionDenied(format!(
                "destination file already exists: {}",
                target.display()
            )));
        }
        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
        count += 1;
    }

    debug!(path = %dest.display(), count, "archive unpacked");
    Ok(UnpackResult {
        ok: true,
        path: dest,
        count,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data/nested")).unwrap();
        std::fs::write(dir.path().join("data/a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join("data/nested/b.txt"), "beta").unwrap();
        dir
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let dir = fixture();
        let packed = pack(
            dir.path(),
            &PackRequest {
                src: "data".into(),
                dest: "out.tar.gz".into(),
                overwrite: false,
            },
        )
        .unwrap();
        assert_eq!(packed.count, 2);
        assert!(packed.path.exists());

        let unpacked = unpack(
            dir.path(),
            &UnpackRequest {
                src: "out.tar.gz".into(),
                dest: "restored".into(),
                overwrite: false,
            },
        )
        .unwrap();
        assert_eq!(unpacked.count, 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("restored/a.txt")).unwrap(),
            "alpha"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("restored/nested/b.txt")).unwrap(),
            "beta"
        );
    }

    #[test]
    fn test_pack_refuses_existing_dest() {
        let dir = fixture();
        std::fs::write(dir.path().join("out.tar.gz"), "old").unwrap();
        let err = pack(
            dir.path(),
            &PackRequest {
                src: "data".into(),
                dest: "out.tar.gz".into(),
                overwrite: false,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
    }

    #[test]
    fn test_pack_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = pack(
            dir.path(),
            &PackRequest {
                src: "nope".into(),
                dest: "out.tar.gz".into(),
                overwrite: false,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_unpack_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let err = unpack(
            dir.path(),
            &UnpackRequest {
                src: "ghost.tar.gz".into(),
                dest: "out".into(),
                overwrite: false,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_unpack_refuses_overwrite_without_flag() {
        let dir = fixture();
        pack(
            dir.path(),
            &PackRequest {
                src: "data".into(),
                dest: "out.tar.gz".into(),
                overwrite: false,
            },
        )
        .unwrap();

        let req = UnpackRequest {
            src: "out.tar.gz".into(),
            dest: "data".into(),
            overwrite: false,
        };
        let err = unpack(dir.path(), &req).unwrap_err();
        assert_eq!(err.kind(), "permission_denied");

        let mut req = req;
        req.overwrite = true;
        assert!(unpack(dir.path(), &req).unwrap().ok);
    }

    #[test]
    fn test_unpack_rejects_traversal_member() {
        let dir = tempfile::tempdir().unwrap();
        // Hand-build an archive whose member path climbs out of dest.
        let file = std::fs::File::create(dir.path().join("evil.tar.gz")).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        let payload = b"owned";
        header.set_size(payload.len() as u64);
        // `append_data` refuses `..` paths, so write the name bytes directly.
        let name = b"../escape.txt";
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
        header.set_cksum();
        builder.append(&header, payload.as_slice()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let err = unpack(
            dir.path(),
            &UnpackRequest {
                src: "evil.tar.gz".into(),
                dest: "out".into(),
                overwrite: false,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_path");
    }
}
