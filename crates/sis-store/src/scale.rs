//! Scaler: decode an image, resample it to exact bounds, re-encode it in the
//! container format it arrived in.
//!
//! The resampling kernel sits behind [`ResampleKernel`] so the algorithm can be
//! swapped without touching format handling.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImage, ImageEncoder, ImageFormat, RgbaImage};

use crate::error::{Result, StoreError};

/// JPEG quality used when re-encoding. Resized variants keep as much detail
/// as the format allows.
pub const JPEG_QUALITY: u8 = 100;

/// Fills a preallocated destination buffer from a decoded source image.
///
/// Implementations must cover the whole destination or fail.
pub trait ResampleKernel: Send + Sync {
    fn resample(&self, dst: &mut RgbaImage, src: &DynamicImage) -> Result<()>;
}

/// Kernel backed by `image::imageops::resize`.
#[derive(Debug, Clone, Copy)]
pub struct FilterKernel {
    filter: FilterType,
}

impl FilterKernel {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for FilterKernel {
    fn default() -> Self {
        Self::new(FilterType::CatmullRom)
    }
}

impl ResampleKernel for FilterKernel {
    fn resample(&self, dst: &mut RgbaImage, src: &DynamicImage) -> Result<()> {
        let resized = image::imageops::resize(src, dst.width(), dst.height(), self.filter);
        dst.copy_from(&resized, 0, 0)
            .map_err(|e| StoreError::Resample(e.to_string()))
    }
}

/// Image scaler. Cheap to clone; clones share the kernel.
#[derive(Clone)]
pub struct Scaler {
    kernel: Arc<dyn ResampleKernel>,
}

impl std::fmt::Debug for Scaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scaler").finish_non_exhaustive()
    }
}

impl Default for Scaler {
    fn default() -> Self {
        Self::new(Arc::new(FilterKernel::default()))
    }
}

impl Scaler {
    pub fn new(kernel: Arc<dyn ResampleKernel>) -> Self {
        Self { kernel }
    }

    /// Resize encoded image bytes to exactly `width` x `height`.
    ///
    /// Bounds are not checked here; the store validates them first.
    pub fn scale(&self, data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        let format = sniff(data)?;

        let src = image::load_from_memory_with_format(data, format)
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        let mut dst = RgbaImage::new(width, height);
        self.kernel.resample(&mut dst, &src)?;
        if dst.dimensions() != (width, height) {
            return Err(StoreError::Resample(format!(
                "kernel produced {}x{}, expected {}x{}",
                dst.width(),
                dst.height(),
                width,
                height
            )));
        }

        tracing::debug!(
            ?format,
            src_width = src.width(),
            src_height = src.height(),
            width,
            height,
            "scaled image"
        );

        encode(dst, format)
    }
}

/// Identify the container and make sure we can write it back out.
fn sniff(data: &[u8]) -> Result<ImageFormat> {
    let format = image::guess_format(data).map_err(|e| StoreError::Decode(e.to_string()))?;
    match format {
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif => Ok(format),
        other => Err(StoreError::UnsupportedFormat(format!("{other:?}"))),
    }
}

fn encode(img: RgbaImage, format: ImageFormat) -> Result<Vec<u8>> {
    let (width, height) = img.dimensions();
    let mut buf = Vec::new();

    let result = match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(img).to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )
        }
        ImageFormat::Png => PngEncoder::new(&mut buf).write_image(
            img.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
        ImageFormat::Gif => {
            // The GIF trailer is written when the encoder drops.
            let mut encoder = GifEncoder::new(Cursor::new(&mut buf));
            encoder.encode(img.as_raw(), width, height, ExtendedColorType::Rgba8)
        }
        other => return Err(StoreError::UnsupportedFormat(format!("{other:?}"))),
    };

    result.map_err(|e| StoreError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Encode a small gradient in the given format.
    pub(crate) fn sample_image(format: ImageFormat, width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 4) as u8, (y * 4) as u8, 128, 255])
        });
        let mut buf = Vec::new();
        let img = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(img).to_rgb8())
        } else {
            DynamicImage::ImageRgba8(img)
        };
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    /// Kernel that counts invocations and delegates to the default filter.
    #[derive(Default)]
    pub(crate) struct CountingKernel {
        pub calls: AtomicUsize,
    }

    impl ResampleKernel for CountingKernel {
        fn resample(&self, dst: &mut RgbaImage, src: &DynamicImage) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            FilterKernel::default().resample(dst, src)
        }
    }

    struct FailingKernel;

    impl ResampleKernel for FailingKernel {
        fn resample(&self, _dst: &mut RgbaImage, _src: &DynamicImage) -> Result<()> {
            Err(StoreError::Resample("kernel refused".to_string()))
        }
    }

    #[test]
    fn test_scale_preserves_format_and_bounds() {
        let scaler = Scaler::default();
        for format in [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Gif] {
            let input = sample_image(format, 64, 48);
            let output = scaler.scale(&input, 20, 10).unwrap();

            assert_eq!(image::guess_format(&output).unwrap(), format);
            let decoded = image::load_from_memory(&output).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (20, 10), "{format:?}");
        }
    }

    #[test]
    fn test_scale_up() {
        let scaler = Scaler::default();
        let input = sample_image(ImageFormat::Png, 8, 8);
        let output = scaler.scale(&input, 200, 100).unwrap();
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }

    #[test]
    fn test_png_keeps_alpha() {
        let img = RgbaImage::from_pixel(16, 16, Rgba([10, 20, 30, 0]));
        let mut input = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut input), ImageFormat::Png)
            .unwrap();

        let output = Scaler::default().scale(&input, 8, 8).unwrap();
        let decoded = image::load_from_memory(&output).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(4, 4)[3], 0);
    }

    #[test]
    fn test_unrecognized_bytes_are_decode_errors() {
        let result = Scaler::default().scale(b"definitely not an image", 10, 10);
        assert!(matches!(result, Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_truncated_image_is_decode_error() {
        let input = sample_image(ImageFormat::Png, 32, 32);
        let result = Scaler::default().scale(&input[..40], 10, 10);
        assert!(matches!(result, Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_format_without_encoder_is_unsupported() {
        // BMP magic; recognized but not one of the formats we write.
        let mut bmp = b"BM".to_vec();
        bmp.extend_from_slice(&[0u8; 64]);
        let result = Scaler::default().scale(&bmp, 10, 10);
        assert!(matches!(result, Err(StoreError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_kernel_errors_propagate() {
        let scaler = Scaler::new(Arc::new(FailingKernel));
        let input = sample_image(ImageFormat::Png, 16, 16);
        let result = scaler.scale(&input, 8, 8);
        assert!(matches!(result, Err(StoreError::Resample(_))));
    }

    #[test]
    fn test_kernel_called_once_per_scale() {
        let kernel = Arc::new(CountingKernel::default());
        let scaler = Scaler::new(kernel.clone());
        let input = sample_image(ImageFormat::Jpeg, 32, 32);
        scaler.scale(&input, 10, 10).unwrap();
        assert_eq!(kernel.calls.load(Ordering::SeqCst), 1);
    }
}
