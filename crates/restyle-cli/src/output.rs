use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use restyle_contracts::data_url::EncodedImage;
use restyle_contracts::results::ItemResult;
use restyle_engine::{Album, StoreSnapshot};
use serde_json::Value;

pub(crate) fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// Reads an image file into its transportable data-URL form.
pub(crate) fn load_image(path: &Path) -> Result<EncodedImage> {
    let Some(mime_type) = mime_for_path(path) else {
        bail!(
            "unsupported image type for {} (expected png, jpg, webp or gif)",
            path.display()
        );
    };
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    EncodedImage::from_bytes(mime_type, &bytes)
        .with_context(|| format!("failed to encode {}", path.display()))
}

/// Lowercase ASCII file-name fragment; runs of anything else collapse
/// to a single dash.
pub(crate) fn file_slug(text: &str) -> String {
    let mut slug = String::new();
    let mut gap = false;
    for ch in text.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if gap && !slug.is_empty() {
                slug.push('-');
            }
            gap = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            gap = true;
        }
    }
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

pub(crate) fn write_image(path: &Path, image: &EncodedImage) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = image.decode_bytes()?;
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub(crate) fn write_json_value(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let encoded = serde_json::to_string_pretty(value)?;
    fs::write(path, encoded)?;
    Ok(())
}

/// Writes every finished image in the snapshot under `out_dir` and returns
/// the written paths. Pending and failed slots are skipped.
pub(crate) fn save_results(snapshot: &StoreSnapshot, out_dir: &Path) -> Result<Vec<String>> {
    let mut targets: Vec<(String, &ItemResult)> = Vec::new();
    for (category, result) in &snapshot.batch {
        targets.push((format!("batch-{}", file_slug(category)), result));
    }
    for (title, result) in &snapshot.scenes {
        targets.push((format!("scene-{}", file_slug(title)), result));
    }
    for (index, result) in snapshot.custom.iter().enumerate() {
        targets.push((format!("custom-{index}"), result));
    }
    if let Some(edit) = &snapshot.edit {
        targets.push((format!("edit-{}", file_slug(&edit.identity)), &edit.result));
    }

    let mut saved = Vec::new();
    for (stem, result) in targets {
        let Some(image) = result.image_url() else {
            continue;
        };
        let path = out_dir.join(format!("{stem}.{}", image.extension()));
        write_image(&path, image)?;
        saved.push(path.to_string_lossy().to_string());
    }
    Ok(saved)
}

/// Writes the album page and its layout manifest next to it; returns the
/// manifest path.
pub(crate) fn write_album(album: &Album, path: &Path) -> Result<PathBuf> {
    write_image(path, &album.image)?;
    let manifest_path = path.with_extension("json");
    write_json_value(&manifest_path, &serde_json::to_value(&album.manifest)?)?;
    Ok(manifest_path)
}
