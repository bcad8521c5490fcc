//! [`ImageProbe`] backed by the `image` crate.

use anyhow::{Context, Result};
use base64::Engine;
use image::{GenericImageView, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;

use crate::models::ImageMetadata;
use crate::traits::ImageProbe;

/// Decodes images from disk.
///
/// A file is readable when its format can be guessed from its content and
/// its header yields dimensions. Extensions are not trusted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileProbe;

impl ImageProbe for ImageFileProbe {
    fn is_readable_image(&self, path: &Path) -> bool {
        let Ok(reader) = ImageReader::open(path) else {
            return false;
        };
        match reader.with_guessed_format() {
            Ok(reader) => reader.into_dimensions().is_ok(),
            Err(_) => false,
        }
    }

    fn metadata(&self, path: &Path, max_width: u32, max_height: u32) -> Result<ImageMetadata> {
        let img = image::open(path)
            .with_context(|| format!("Failed to decode image: {}", path.display()))?;
        let (width, height) = img.dimensions();
        let depth = img.color().channel_count();

        let thumb = img.thumbnail(max_width, max_height);
        let mut png = Cursor::new(Vec::new());
        thumb
            .write_to(&mut png, ImageFormat::Png)
            .context("Failed to encode thumbnail")?;

        let encoded = base64::engine::general_purpose::STANDARD.encode(png.into_inner());
        Ok(ImageMetadata {
            width,
            height,
            depth,
            thumbnail: format!("data:image/png;base64,{}", encoded),
        })
    }
}

/// Whole file as a `data:` URL. The MIME type is sniffed from the content.
pub fn encode_file_data_url(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read image: {}", path.display()))?;
    let mime = image::guess_format(&bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(format!("data:{};base64,{}", mime, encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    #[test]
    fn readable_png_yields_metadata_and_bounded_thumbnail() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wide.png");
        RgbImage::new(640, 320).save(&path).unwrap();

        let probe = ImageFileProbe;
        assert!(probe.is_readable_image(&path));

        let meta = probe.metadata(&path, 64, 64).unwrap();
        assert_eq!((meta.width, meta.height, meta.depth), (640, 320, 3));
        let encoded = meta.thumbnail.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert!(thumb.width() <= 64 && thumb.height() <= 64);
    }

    #[test]
    fn whole_file_is_encoded_with_sniffed_mime() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("no_extension");
        RgbImage::new(4, 4)
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();

        let url = encode_file_data_url(&path).unwrap();
        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(bytes, std::fs::read(&path).unwrap());

        assert!(encode_file_data_url(&tmp.path().join("missing.png")).is_err());
    }

    #[test]
    fn garbage_and_missing_files_are_unreadable() {
        let tmp = TempDir::new().unwrap();
        let fake = tmp.path().join("fake.png");
        std::fs::write(&fake, b"not an image").unwrap();

        let probe = ImageFileProbe;
        assert!(!probe.is_readable_image(&fake));
        assert!(!probe.is_readable_image(&tmp.path().join("missing.png")));
        assert!(probe.metadata(&fake, 32, 32).is_err());
    }
}
