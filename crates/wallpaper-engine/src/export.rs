use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use wallpaper_contracts::Artifact;

/// Reads an image file into the base64 form the client and gallery work with.
pub fn read_image_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    Ok(BASE64.encode(bytes))
}

pub fn write_image_file(image_data: &str, path: &Path) -> Result<()> {
    let bytes = BASE64
        .decode(image_data.trim().as_bytes())
        .context("image data is not valid base64")?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Writes a saved artifact as `ai-wallpaper-<short id>.<ext>` under `dir`.
pub fn export_artifact(artifact: &Artifact, dir: &Path) -> Result<PathBuf> {
    let bytes = BASE64
        .decode(artifact.image_data.trim().as_bytes())
        .with_context(|| format!("artifact {} holds invalid base64", artifact.id))?;
    let path = dir.join(format!(
        "ai-wallpaper-{}.{}",
        artifact.short_id(),
        image_extension(&bytes)
    ));
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn image_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("png")
}
