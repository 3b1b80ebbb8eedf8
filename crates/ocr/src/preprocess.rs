use image::{DynamicImage, GrayImage};
use std::io::Cursor;
use thiserror::Error;

/// Longest edge, in pixels, a scan is allowed to keep before OCR.
pub const MAX_SCAN_EDGE: u32 = 3200;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to load page image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Failed to encode page image: {0}")]
    Encode(String),
}

/// Decodes a scanned page (JPEG / PNG / …), normalizes it and returns PNG
/// bytes for the recognizer.
pub fn prepare_page(data: &[u8]) -> Result<Vec<u8>, PreprocessError> {
    let page = image::load_from_memory(data)?;
    to_png(normalize_scan(page))
}

/// Downscale oversized scans, drop colour and stretch the gray levels so
/// faint pencil marks and stamp ink end up at full contrast.
///
/// The cloud service bills and limits by request size, so the downscale keeps
/// phone photos of a sheet within its payload limit. Handwritten scores in
/// pencil come out of a flatbed scanner as light gray on off-white paper. The
/// stretch keeps those digits from being read as background by either engine.
fn normalize_scan(page: DynamicImage) -> DynamicImage {
    let page = if page.width().max(page.height()) > MAX_SCAN_EDGE {
        page.resize(MAX_SCAN_EDGE, MAX_SCAN_EDGE, image::imageops::FilterType::Triangle)
    } else {
        page
    };

    let mut gray: GrayImage = page.to_luma8();
    let (lo, hi) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));

    if hi > lo {
        let span = u16::from(hi - lo);
        let table: Vec<u8> = (0..=255u16)
            .map(|v| {
                let v = v.clamp(u16::from(lo), u16::from(hi)) - u16::from(lo);
                (v * 255 / span) as u8
            })
            .collect();
        for p in gray.pixels_mut() {
            p[0] = table[p[0] as usize];
        }
    }

    DynamicImage::ImageLuma8(gray)
}

fn to_png(page: DynamicImage) -> Result<Vec<u8>, PreprocessError> {
    let mut out = Cursor::new(Vec::new());
    page.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb, RgbImage};

    fn encode(img: DynamicImage, format: image::ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn flat_page_survives() {
        let flat: GrayImage = ImageBuffer::from_pixel(12, 8, Luma([180u8]));
        let result = normalize_scan(DynamicImage::ImageLuma8(flat)).to_luma8();
        assert_eq!(result.dimensions(), (12, 8));
        assert!(result.pixels().all(|p| p[0] == 180));
    }

    #[test]
    fn faded_ink_is_stretched() {
        // Pale page: ink at 100, paper at 200.
        let page: GrayImage =
            ImageBuffer::from_fn(10, 1, |x, _| Luma([if x < 5 { 100 } else { 200 }]));
        let result = normalize_scan(DynamicImage::ImageLuma8(page)).to_luma8();
        assert_eq!(result.get_pixel(0, 0)[0], 0);
        assert_eq!(result.get_pixel(9, 0)[0], 255);
    }

    #[test]
    fn colour_scan_becomes_gray_png() {
        let rgb: RgbImage = ImageBuffer::from_pixel(4, 4, Rgb([10u8, 120, 240]));
        let scan = encode(DynamicImage::ImageRgb8(rgb), image::ImageFormat::Png);
        let png = prepare_page(&scan).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
        let decoded = image::load_from_memory(&png).unwrap();
        assert!(matches!(decoded, DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn oversized_scan_is_reduced() {
        let page: GrayImage = ImageBuffer::from_pixel(MAX_SCAN_EDGE + 400, 100, Luma([90u8]));
        let result = normalize_scan(DynamicImage::ImageLuma8(page));
        assert!(result.width() <= MAX_SCAN_EDGE);
    }

    #[test]
    fn garbage_bytes_rejected() {
        assert!(matches!(prepare_page(b"not an image"), Err(PreprocessError::Load(_))));
    }
}
