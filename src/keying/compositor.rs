use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::{debug, info};

use crate::error::{Result, VideoError};
use crate::keying::mask::Mask;
use crate::video::{CompositeFrame, Frame};

/// The still image shown wherever the key color was
///
/// Resized once to the video's dimensions before the frame loop and only
/// ever read afterwards.
#[derive(Debug, Clone)]
pub struct BackgroundImage {
    image: RgbImage,
}

impl BackgroundImage {
    /// Load a PNG/JPEG and resize it to `width` x `height`
    pub fn load<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| VideoError::Background {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
            .to_rgb8();

        info!(
            "Loaded background {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self::from_image(image, width, height))
    }

    /// Use an in-memory image, resized to `width` x `height` if needed
    pub fn from_image(image: RgbImage, width: u32, height: u32) -> Self {
        if image.dimensions() == (width, height) {
            return Self { image };
        }

        debug!(
            "Resizing background {}x{} -> {}x{}",
            image.width(),
            image.height(),
            width,
            height
        );
        Self {
            image: imageops::resize(&image, width, height, FilterType::Triangle),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.image.get_pixel(x, y).0
    }

    fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// Swaps keyed pixels for background pixels
///
/// Borrowing the background for the compositor's lifetime keeps it immutable
/// across the whole frame loop.
#[derive(Debug, Clone, Copy)]
pub struct FrameCompositor<'a> {
    background: &'a BackgroundImage,
}

impl<'a> FrameCompositor<'a> {
    /// Fails with `DimensionMismatch` unless the background is exactly
    /// `width` x `height`. Checked once here, not per frame.
    pub fn new(background: &'a BackgroundImage, width: u32, height: u32) -> Result<Self> {
        if background.dimensions() != (width, height) {
            return Err(VideoError::DimensionMismatch {
                expected: (width, height),
                actual: background.dimensions(),
            }
            .into());
        }
        Ok(Self { background })
    }

    /// Keyed pixels come from the background, all others from `frame`, unchanged
    pub fn composite(&self, mut frame: Frame, mask: &Mask) -> CompositeFrame {
        debug_assert_eq!(frame.dimensions(), self.background.dimensions());
        debug_assert_eq!(frame.dimensions(), mask.dimensions());

        let background = self.background.as_bytes();
        let pixels = frame.as_bytes_mut().chunks_exact_mut(3);
        for ((pixel, keyed), replacement) in pixels
            .zip(mask.as_slice())
            .zip(background.chunks_exact(3))
        {
            if *keyed {
                pixel.copy_from_slice(replacement);
            }
        }

        CompositeFrame::new(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keying::hsv::convert;
    use crate::keying::mask::KeyMaskGenerator;
    use image::Rgb;

    fn checkerboard_background(width: u32, height: u32) -> BackgroundImage {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, 200])
        });
        BackgroundImage::from_image(image, width, height)
    }

    #[test]
    fn test_keyed_pixels_take_background_exactly() {
        let background = checkerboard_background(20, 10);
        let mut frame = Frame::new_filled(20, 10, [0, 255, 0]);
        for x in 5..15 {
            for y in 2..8 {
                frame.set_pixel(x, y, [200, (x * 10) as u8, (y * 20) as u8]);
            }
        }
        let source = frame.clone();

        let mask = KeyMaskGenerator::default().generate(&convert(&frame));
        let compositor = FrameCompositor::new(&background, 20, 10).unwrap();
        let output = compositor.composite(frame, &mask);

        assert_eq!(output.dimensions(), (20, 10));
        for y in 0..10 {
            for x in 0..20 {
                let got = output.as_frame().get_pixel(x, y);
                if mask.is_key(x, y) {
                    assert_eq!(got, background.get_pixel(x, y), "at ({x}, {y})");
                } else {
                    assert_eq!(got, source.get_pixel(x, y), "at ({x}, {y})");
                }
            }
        }
        assert_eq!(mask.key_count(), 200 - 60);
    }

    #[test]
    fn test_empty_mask_leaves_frame_untouched() {
        let background = checkerboard_background(4, 4);
        let frame = Frame::new_filled(4, 4, [255, 0, 0]);
        let mask = KeyMaskGenerator::default().generate(&convert(&frame));

        let output = FrameCompositor::new(&background, 4, 4).unwrap().composite(frame.clone(), &mask);
        assert_eq!(output.into_frame(), frame);
    }

    #[test]
    fn test_background_is_resized_to_frame() {
        let big = RgbImage::from_pixel(1920, 1080, Rgb([0, 0, 255]));
        let background = BackgroundImage::from_image(big, 64, 48);
        assert_eq!(background.dimensions(), (64, 48));
        assert_eq!(background.get_pixel(10, 10), [0, 0, 255]);

        let frame = Frame::new_filled(64, 48, [0, 255, 0]);
        let mask = KeyMaskGenerator::default().generate(&convert(&frame));
        let output = FrameCompositor::new(&background, 64, 48).unwrap().composite(frame, &mask);
        assert_eq!(output.dimensions(), (64, 48));
    }

    #[test]
    fn test_mismatched_background_is_rejected_up_front() {
        let background = checkerboard_background(32, 32);
        let err = FrameCompositor::new(&background, 64, 48).unwrap_err();
        assert!(matches!(
            err,
            crate::error::CompositorError::Video(VideoError::DimensionMismatch {
                expected: (64, 48),
                actual: (32, 32)
            })
        ));
    }

    #[test]
    fn test_missing_background_file() {
        let err = BackgroundImage::load("/no/such/background.png", 64, 48).unwrap_err();
        assert!(matches!(
            err,
            crate::error::CompositorError::Video(VideoError::Background { .. })
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.png");
        RgbImage::from_pixel(100, 50, Rgb([1, 2, 3])).save(&path).unwrap();

        let background = BackgroundImage::load(&path, 10, 6).unwrap();
        assert_eq!(background.dimensions(), (10, 6));
        assert_eq!(background.get_pixel(0, 0), [1, 2, 3]);
    }
}
