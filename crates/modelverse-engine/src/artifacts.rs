use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageReader;
pub use modelverse_contracts::runs::save_artifact;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageProbe {
    pub width: u32,
    pub height: u32,
    pub extension: String,
}

/// Format and dimensions, or `None` when the bytes are not a supported image.
pub fn probe_image(bytes: &[u8]) -> Option<ImageProbe> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let format = reader.format()?;
    let extension = format.extensions_str().first().copied().unwrap_or("bin").to_string();
    let (width, height) = reader.into_dimensions().ok()?;
    Some(ImageProbe {
        width,
        height,
        extension,
    })
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// `<prefix>_<YYYYmmdd_HHMMSS>[_<index>].<ext>`
pub fn artifact_file_name(prefix: &str, index: Option<usize>, extension: &str) -> String {
    let prefix = prefix.trim();
    let prefix = if prefix.is_empty() { "Modelverse" } else { prefix };
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let extension = extension.trim_start_matches('.');
    match index {
        Some(index) => format!("{prefix}_{stamp}_{index}.{extension}"),
        None => format!("{prefix}_{stamp}.{extension}"),
    }
}

/// Passes URLs and `data:` URIs through; reads local files into a `data:` URI.
pub fn image_reference(raw: &str) -> Result<String> {
    let value = raw.trim();
    if value.is_empty() {
        bail!("image reference is empty");
    }
    let lowered = value.to_ascii_lowercase();
    if lowered.starts_with("http://")
        || lowered.starts_with("https://")
        || lowered.starts_with("data:image/")
    {
        return Ok(value.to_string());
    }
    let path = PathBuf::from(value);
    let bytes = fs::read(&path).with_context(|| format!("failed reading {}", path.display()))?;
    let mime = mime_for_path(&path)
        .or_else(|| probe_image(&bytes).and_then(|probe| mime_for_extension(&probe.extension)))
        .with_context(|| format!("{} is not a supported image", path.display()))?;
    Ok(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    mime_for_extension(&ext)
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{artifact_file_name, image_reference, sha256_hex};

    #[test]
    fn file_names_are_prefixed_and_stamped() {
        let name = artifact_file_name("ComfyUI", None, "mp4");
        assert!(name.starts_with("ComfyUI_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(name.len(), "ComfyUI_20260101_000000.mp4".len());

        let indexed = artifact_file_name("  ", Some(2), ".png");
        assert!(indexed.starts_with("Modelverse_"));
        assert!(indexed.ends_with("_2.png"));
    }

    #[test]
    fn references_pass_urls_and_encode_files() -> anyhow::Result<()> {
        assert_eq!(image_reference(" https://x/a.png ")?, "https://x/a.png");
        assert_eq!(image_reference("data:image/png;base64,AAAA")?, "data:image/png;base64,AAAA");

        let temp = tempfile::tempdir()?;
        let path = temp.path().join("frame.jpg");
        fs::write(&path, [1u8, 2, 3])?;
        assert_eq!(
            image_reference(path.to_str().unwrap_or_default())?,
            "data:image/jpeg;base64,AQID"
        );

        let unknown = temp.path().join("notes.txt");
        fs::write(&unknown, b"hello")?;
        assert!(image_reference(unknown.to_str().unwrap_or_default()).is_err());
        assert!(image_reference("   ").is_err());
        Ok(())
    }

    #[test]
    fn sha256_matches_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
