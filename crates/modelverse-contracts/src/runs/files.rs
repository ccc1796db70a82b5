use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::NamedTempFile;

/// Writes `bytes` under `dir` via a temporary file that is renamed into place, so a
/// failed write leaves nothing behind. An existing file is never overwritten; a
/// `-N` suffix is added instead.
pub fn save_artifact(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed creating {}", dir.display()))?;
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed creating temporary file in {}", dir.display()))?;
    temp.write_all(bytes)
        .with_context(|| format!("failed writing {file_name} into {}", dir.display()))?;
    temp.flush()?;

    let target = Path::new(file_name);
    let stem = target
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    let extension = target
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    for attempt in 0..1000u32 {
        let candidate = if attempt == 0 {
            dir.join(format!("{stem}{extension}"))
        } else {
            dir.join(format!("{stem}-{attempt}{extension}"))
        };
        match temp.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => {
                temp = err.file;
            }
            Err(err) => {
                return Err(err.error)
                    .with_context(|| format!("failed saving {}", candidate.display()));
            }
        }
    }
    bail!("no free file name for {file_name} in {}", dir.display())
}
