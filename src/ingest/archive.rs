//! Optional archival of processed audio files.
//!
//! Runs after the ledger commit, so a failure here never affects notebook or
//! ledger correctness.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::fs;

const MAX_SUFFIX: usize = 1000;

/// Archive settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Archive root directory
    pub dir: PathBuf,

    /// strftime subdirectory under the root (e.g. `%Y/%m`)
    pub subdir_format: String,

    /// Remove the inbox copy once archived
    pub delete_original: bool,
}

/// True when every item of a strftime format is recognised
pub fn is_valid_subdir_format(subdir_format: &str) -> bool {
    !StrftimeItems::new(subdir_format).any(|item| matches!(item, Item::Error))
}

fn format_subdir(subdir_format: &str, now: DateTime<Local>) -> io::Result<String> {
    let mut out = String::new();
    write!(out, "{}", now.format(subdir_format)).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid archive subdir_format: {subdir_format:?}"),
        )
    })?;
    Ok(out)
}

/// Destination under `<root>/<subdir_format>/`, keeping the file name.
/// On collision a `__N` suffix is added before the extension; an existing
/// archive file is never chosen.
pub fn plan_archive_path(
    source: &Path,
    archive_root: &Path,
    subdir_format: &str,
    now: DateTime<Local>,
) -> io::Result<PathBuf> {
    let dest_dir = archive_root.join(format_subdir(subdir_format, now)?);
    let file_name = source.file_name().unwrap_or_default();
    let dest = dest_dir.join(file_name);
    if !dest.exists() {
        return Ok(dest);
    }

    let stem = source.file_stem().unwrap_or_default().to_string_lossy();
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..MAX_SUFFIX)
        .map(|i| dest_dir.join(format!("{}__{}{}", stem, i, ext)))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("no free archive name for {}", dest.display()),
            )
        })
}

/// Copy `source` into the archive and optionally delete it.
/// Returns the archived path.
pub async fn archive_audio(
    source: &Path,
    config: &ArchiveConfig,
    now: DateTime<Local>,
) -> io::Result<PathBuf> {
    let dest = plan_archive_path(source, &config.dir, &config.subdir_format, now)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    tracing::info!("Archiving audio: {} -> {}", source.display(), dest.display());
    fs::copy(source, &dest).await?;

    if config.delete_original {
        tracing::info!("Removing original audio from inbox: {}", source.display());
        match fs::remove_file(source).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    Ok(dest)
}
