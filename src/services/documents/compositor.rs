//! Inspection photo composition: one image group becomes a single strip of
//! photos placed side by side on a white canvas.

use std::path::{Component, Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageError, Rgba, RgbaImage};
use thiserror::Error;

use super::docx::ImageSpec;

/// Widest photo allowed in a strip, as a multiple of the target height.
pub const MAX_ASPECT_RATIO: u32 = 8;

/// Default cap on the pixels of one composite canvas (64 MiB as RGBA).
pub const MAX_CANVAS_PIXELS: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to save composite {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
}

/// How photos are fitted to the target height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalePolicy {
    /// Every photo is scaled to exactly the target height.
    #[default]
    Exact,
    /// Only photos taller than the target are scaled; smaller ones keep their size.
    DownOnly,
}

impl ScalePolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "down_only" | "down-only" => Some(Self::DownOnly),
            _ => None,
        }
    }
}

/// A composed image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl CompositeImage {
    /// Embedding size, at most `max_width` wide with the aspect ratio kept.
    pub fn display_spec(&self, max_width: u32) -> ImageSpec {
        let (width, height) = if self.width > max_width && self.width > 0 {
            let scaled = (self.height as f64 * max_width as f64 / self.width as f64).round() as u32;
            (max_width, scaled.max(1))
        } else {
            (self.width, self.height)
        };
        ImageSpec {
            path: self.path.clone(),
            width,
            height,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Compositor {
    public_dir: PathBuf,
    output_dir: PathBuf,
    target_height: u32,
    spacing: u32,
    policy: ScalePolicy,
    max_canvas_pixels: u64,
}

impl Compositor {
    pub fn new(
        public_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        target_height: u32,
        spacing: u32,
        policy: ScalePolicy,
    ) -> Self {
        Self {
            public_dir: public_dir.into(),
            output_dir: output_dir.into(),
            target_height,
            spacing,
            policy,
            max_canvas_pixels: MAX_CANVAS_PIXELS,
        }
    }

    pub fn with_max_canvas_pixels(mut self, pixels: u64) -> Self {
        self.max_canvas_pixels = pixels;
        self
    }

    fn max_photo_width(&self) -> u32 {
        self.target_height.saturating_mul(MAX_ASPECT_RATIO)
    }

    /// Resolve a public URL path such as `/storage/inspections/a.png`
    /// to a file under the public directory.
    pub fn resolve(&self, public_path: &str) -> Option<PathBuf> {
        let relative = Path::new(public_path.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || !relative.components().all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.public_dir.join(relative))
    }

    fn load_scaled(&self, public_path: &str) -> Option<DynamicImage> {
        if public_path.trim().is_empty() {
            return None;
        }
        let Some(path) = self.resolve(public_path) else {
            tracing::warn!(path = public_path, "Rejected inspection image path");
            return None;
        };
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "Inspection image not found");
            return None;
        }

        let img = match image::open(&path) {
            Ok(img) => img,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Could not process image");
                return None;
            }
        };
        if img.width() == 0 || img.height() == 0 {
            return None;
        }

        let (w, h) = (img.width() as f64, img.height() as f64);
        let to_target = self.target_height as f64 / h;
        let mut factor = match self.policy {
            ScalePolicy::Exact => to_target,
            ScalePolicy::DownOnly => to_target.min(1.0),
        };
        // Panoramas are fitted into the widest allowed box instead.
        let max_width = self.max_photo_width() as f64;
        if w * factor > max_width {
            tracing::warn!(path = %path.display(), width = img.width(), height = img.height(), "Inspection image too wide, shrinking to fit");
            factor = max_width / w;
        }
        if factor == 1.0 {
            return Some(img);
        }
        let width = ((w * factor).round() as u32).max(1);
        let height = ((h * factor).round() as u32).max(1);
        Some(img.resize_exact(width, height, FilterType::Lanczos3))
    }

    /// Compose the photos of one group. Returns `None` when no photo could be used.
    pub fn composite(&self, paths: &[String], group_index: usize) -> Result<Option<CompositeImage>, CompositeError> {
        if self.target_height == 0 {
            return Ok(None);
        }
        let max_width = self.max_canvas_pixels / self.target_height as u64;
        let mut photos: Vec<DynamicImage> = Vec::new();
        let mut used: u64 = 0;
        for img in paths.iter().filter_map(|p| self.load_scaled(p)) {
            let gap = if photos.is_empty() { 0 } else { self.spacing as u64 };
            if used + gap + img.width() as u64 > max_width {
                tracing::warn!(group = group_index, kept = photos.len(), "Composite canvas is full, dropping remaining images");
                break;
            }
            used += gap + img.width() as u64;
            photos.push(img);
        }
        if photos.is_empty() {
            return Ok(None);
        }

        let width = u32::try_from(used).unwrap_or(u32::MAX);
        if width == 0 {
            return Ok(None);
        }

        let mut canvas = RgbaImage::from_pixel(width, self.target_height, Rgba([255, 255, 255, 255]));
        let mut x: i64 = 0;
        for photo in &photos {
            imageops::overlay(&mut canvas, &photo.to_rgba8(), x, 0);
            x += photo.width() as i64 + self.spacing as i64;
        }

        std::fs::create_dir_all(&self.output_dir).map_err(|source| CompositeError::OutputDir {
            path: self.output_dir.clone(),
            source,
        })?;
        let path = self.output_dir.join(format!(
            "image_group_{}_{}.png",
            group_index,
            chrono::Utc::now().timestamp()
        ));
        canvas.save(&path).map_err(|source| CompositeError::Save {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), photos = photos.len(), width, "Composed inspection images");
        Ok(Some(CompositeImage {
            path,
            width,
            height: self.target_height,
        }))
    }
}
