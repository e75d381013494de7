//! Turn square-ish badge artwork into round PNGs with a transparent corner.

use std::path::{Path, PathBuf};

use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{AppError, AppResult};

/// Output folder created inside the input folder.
pub const OUTPUT_DIR: &str = "_procesadas";

/// Pixels shaved off the circle radius so the edge never touches the border.
const EDGE_INSET: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeFailure {
    pub file: String,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BadgeReport {
    pub output_dir: String,
    pub requested: u64,
    pub processed: u64,
    pub missing: Vec<String>,
    pub failed: Vec<BadgeFailure>,
}

fn image_error(code: &str, path: &Path, err: image::ImageError) -> AppError {
    AppError::new(format!("IMAGE/{code}"), err.to_string())
        .with_context("path", path.display().to_string())
}

/// Centre-crop to the shorter side and make everything outside a circle of
/// radius `size / 2 - 2` fully transparent; pixels inside become opaque.
pub fn circular_badge(source: &DynamicImage) -> AppResult<RgbaImage> {
    let rgba = source.to_rgba8();
    let (width, height) = rgba.dimensions();
    let size = width.min(height);
    if size == 0 {
        return Err(AppError::new("IMAGE/EMPTY", "Image has no pixels."));
    }
    let left = (width - size) / 2;
    let top = (height - size) / 2;
    let mut square = imageops::crop_imm(&rgba, left, top, size, size).to_image();

    let center = i64::from(size / 2);
    let radius = i64::from((size / 2).saturating_sub(EDGE_INSET));
    for (x, y, pixel) in square.enumerate_pixels_mut() {
        let dx = i64::from(x) - center;
        let dy = i64::from(y) - center;
        pixel[3] = if dx * dx + dy * dy <= radius * radius { 255 } else { 0 };
    }
    Ok(square)
}

pub fn process_badge(input: &Path, output: &Path) -> AppResult<()> {
    let source = image::open(input).map_err(|err| image_error("DECODE", input, err))?;
    let badge = circular_badge(&source)?;
    badge
        .save_with_format(output, ImageFormat::Png)
        .map_err(|err| image_error("ENCODE", output, err))
}

/// PNG files directly inside `folder`, sorted by name.
pub fn list_pngs(folder: &Path) -> AppResult<Vec<String>> {
    let entries = std::fs::read_dir(folder).map_err(|err| {
        AppError::input("FOLDER_NOT_FOUND", "Badge folder cannot be read.")
            .with_context("path", folder.display().to_string())
            .with_cause(err)
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_png = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("png"))
            .unwrap_or(false);
        if path.is_file() && is_png {
            if let Some(name) = path.file_name() {
                files.push(name.to_string_lossy().into_owned());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Process `files` (or every PNG in `folder`) into `folder/_procesadas/`.
pub fn process_badges(folder: &Path, files: Option<Vec<String>>) -> AppResult<BadgeReport> {
    if !folder.is_dir() {
        return Err(AppError::input("FOLDER_NOT_FOUND", "Badge folder does not exist.")
            .with_context("path", folder.display().to_string()));
    }
    let files = match files {
        Some(files) if !files.is_empty() => files,
        _ => list_pngs(folder)?,
    };
    let output_dir: PathBuf = folder.join(OUTPUT_DIR);
    std::fs::create_dir_all(&output_dir)?;

    let mut report = BadgeReport {
        output_dir: output_dir.display().to_string(),
        requested: files.len() as u64,
        ..BadgeReport::default()
    };

    for file in files {
        let input = folder.join(&file);
        if !input.is_file() {
            warn!(target: "recorrido_admin", event = "badge_missing", file = %file);
            report.missing.push(file);
            continue;
        }
        match process_badge(&input, &output_dir.join(&file)) {
            Ok(()) => {
                report.processed += 1;
                info!(target: "recorrido_admin", event = "badge_processed", file = %file);
            }
            Err(err) => {
                warn!(
                    target: "recorrido_admin",
                    event = "badge_failed",
                    file = %file,
                    error = %err,
                );
                report.failed.push(BadgeFailure {
                    file,
                    code: err.code().to_string(),
                    reason: err.message().to_string(),
                });
            }
        }
    }
    Ok(report)
}
