use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use geolens_contracts::analysis::ImagePayload;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use sha2::{Digest, Sha256};

/// Reads an image file into a payload.
///
/// The MIME type comes from the extension, then from content sniffing, and
/// defaults to `image/png`. With `max_dim` set, larger images are resized to
/// fit and re-encoded as JPEG; undecodable files are sent unchanged.
pub fn load_image_payload(path: &Path, max_dim: Option<u32>) -> Result<ImagePayload> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    let mime = mime_for_path(path)
        .or_else(|| sniff_mime(&bytes))
        .unwrap_or("image/png");
    let payload = ImagePayload::new(bytes, mime);
    match max_dim {
        Some(dim) => Ok(downscale_payload(payload, dim)),
        None => Ok(payload),
    }
}

pub fn image_digest(payload: &ImagePayload) -> String {
    hex::encode(Sha256::digest(&payload.bytes))
}

pub fn downscale_payload(payload: ImagePayload, max_dim: u32) -> ImagePayload {
    let dim = max_dim.max(1);
    let Ok(decoded) = image::load_from_memory(&payload.bytes) else {
        return payload;
    };
    if decoded.width().max(decoded.height()) <= dim {
        return payload;
    }
    let resized = DynamicImage::ImageRgba8(flatten_on_white(&decoded))
        .resize(dim, dim, FilterType::Triangle)
        .to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 90);
    if encoder
        .encode_image(&DynamicImage::ImageRgb8(resized))
        .is_err()
    {
        return payload;
    }
    ImagePayload::new(bytes, "image/jpeg")
}

/// JPEG has no alpha; transparent areas become white instead of black.
fn flatten_on_white(image: &DynamicImage) -> RgbaImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    flattened
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())?;
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    use super::{downscale_payload, image_digest, load_image_payload, mime_for_path};

    fn write_png(path: &Path, width: u32, height: u32) -> anyhow::Result<()> {
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([120, 96, 80]);
        }
        image.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }

    #[test]
    fn mime_comes_from_extension_then_content() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let named = temp.path().join("sample.JPG");
        fs::write(&named, b"not really a jpeg")?;
        assert_eq!(load_image_payload(&named, None)?.mime_type, "image/jpeg");

        let unnamed = temp.path().join("upload.bin");
        write_png(&unnamed, 4, 4)?;
        assert_eq!(load_image_payload(&unnamed, None)?.mime_type, "image/png");

        let opaque = temp.path().join("blob");
        fs::write(&opaque, b"????")?;
        assert_eq!(load_image_payload(&opaque, None)?.mime_type, "image/png");

        assert_eq!(mime_for_path(Path::new("a.webp")), Some("image/webp"));
        assert_eq!(mime_for_path(Path::new("a.tiff")), None);
        Ok(())
    }

    #[test]
    fn empty_or_missing_files_are_errors() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let empty = temp.path().join("empty.png");
        fs::write(&empty, b"")?;
        assert!(load_image_payload(&empty, None).is_err());
        assert!(load_image_payload(&temp.path().join("missing.png"), None).is_err());
        Ok(())
    }

    #[test]
    fn large_images_are_downscaled_to_jpeg() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("outcrop.png");
        write_png(&path, 256, 128)?;

        let payload = load_image_payload(&path, Some(64))?;
        assert_eq!(payload.mime_type, "image/jpeg");
        let decoded = image::load_from_memory(&payload.bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (64, 32));

        let small = load_image_payload(&path, Some(512))?;
        assert_eq!(small.mime_type, "image/png");
        Ok(())
    }

    #[test]
    fn transparent_pixels_become_white_not_black() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("cutout.png");
        let mut cutout = RgbaImage::new(200, 100);
        for (x, _, pixel) in cutout.enumerate_pixels_mut() {
            *pixel = if x < 100 {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([40, 60, 90, 255])
            };
        }
        cutout.save_with_format(&path, ImageFormat::Png)?;

        let payload = load_image_payload(&path, Some(50))?;
        assert_eq!(payload.mime_type, "image/jpeg");
        let decoded = image::load_from_memory(&payload.bytes)?.to_rgb8();
        assert_eq!((decoded.width(), decoded.height()), (50, 25));

        let background = decoded.get_pixel(5, 12);
        assert!(background.0.iter().all(|&channel| channel > 240), "{background:?}");
        let specimen = decoded.get_pixel(45, 12);
        assert!(specimen[2] < 140, "{specimen:?}");
        Ok(())
    }

    #[test]
    fn undecodable_payload_is_left_alone() {
        let payload = geolens_contracts::analysis::ImagePayload::new(b"heic?".to_vec(), "image/heic");
        let same = downscale_payload(payload.clone(), 32);
        assert_eq!(same, payload);
        assert_eq!(image_digest(&same).len(), 64);
    }
}
