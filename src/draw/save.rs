use crate::draw::composite::RgbaBuffer;
use crate::draw::error::{EngineError, Result};
use anyhow::Context;
use base64::Engine as _;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};
use std::path::Path;

pub const DEFAULT_DOWNLOAD_STEM: &str = "artwork";

/// An encoded PNG export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl Raster {
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.png)
        )
    }

    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create export folder {}", parent.display()))?;
        }
        std::fs::write(path, &self.png)
            .with_context(|| format!("write exported artwork {}", path.display()))
    }
}

pub fn encode_png(buffer: &RgbaBuffer) -> Result<Raster> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&buffer.pixels, buffer.width, buffer.height, ColorType::Rgba8)
        .map_err(|err| EngineError::ExportFailed(format!("png encoding: {err}")))?;
    Ok(Raster {
        width: buffer.width,
        height: buffer.height,
        png,
    })
}

/// `my-lesson-artwork.png` for a titled lesson, `artwork.png` otherwise.
pub fn download_file_name(lesson_title: Option<&str>) -> String {
    let stem = lesson_title
        .map(slug::slugify)
        .filter(|s| !s.is_empty())
        .map(|s| format!("{s}-{DEFAULT_DOWNLOAD_STEM}"))
        .unwrap_or_else(|| DEFAULT_DOWNLOAD_STEM.to_owned());
    format!("{stem}.png")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::model::Rgba;

    #[test]
    fn png_decodes_back_to_the_same_pixels() {
        let buffer = RgbaBuffer::new(3, 2, Rgba::rgba(1, 2, 3, 255));
        let raster = encode_png(&buffer).expect("encode");
        assert_eq!((raster.width, raster.height), (3, 2));
        let decoded = image::load_from_memory(&raster.png).expect("decode").to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(2, 1).0, [1, 2, 3, 255]);
    }

    #[test]
    fn data_uri_has_png_prefix() {
        let raster = encode_png(&RgbaBuffer::new(1, 1, Rgba::WHITE)).expect("encode");
        let uri = raster.to_data_uri();
        let payload = uri
            .strip_prefix("data:image/png;base64,")
            .expect("png data uri");
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .expect("base64");
        assert_eq!(bytes, raster.png);
    }

    #[test]
    fn download_name_is_slugged_lesson_title() {
        assert_eq!(download_file_name(None), "artwork.png");
        assert_eq!(download_file_name(Some("   ")), "artwork.png");
        assert_eq!(
            download_file_name(Some("Drawing Hands: Part 2")),
            "drawing-hands-part-2-artwork.png"
        );
    }

    #[test]
    fn write_to_creates_parent_folders() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("out.png");
        let raster = encode_png(&RgbaBuffer::new(1, 1, Rgba::BLACK)).expect("encode");
        raster.write_to(&path).expect("write");
        assert_eq!(std::fs::read(&path).expect("read"), raster.png);
    }
}
