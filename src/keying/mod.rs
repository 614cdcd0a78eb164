//! # Keying Module
//!
//! Per-frame chroma keying: RGB to HSV conversion, key mask classification,
//! and background substitution.
//!
//! ## Usage
//!
//! ```rust
//! use chroma_compositor::keying::{hsv, BackgroundImage, FrameCompositor, KeyMaskGenerator};
//! use chroma_compositor::video::Frame;
//! use image::{Rgb, RgbImage};
//!
//! # fn main() -> chroma_compositor::Result<()> {
//! let background = BackgroundImage::from_image(RgbImage::from_pixel(8, 8, Rgb([0, 0, 255])), 4, 4);
//! let compositor = FrameCompositor::new(&background, 4, 4)?;
//! let keyer = KeyMaskGenerator::default();
//!
//! let frame = Frame::new_filled(4, 4, [0, 255, 0]);
//! let mask = keyer.generate(&hsv::convert(&frame));
//! let output = compositor.composite(frame, &mask);
//!
//! assert_eq!(output.as_frame().get_pixel(0, 0), [0, 0, 255]);
//! # Ok(())
//! # }
//! ```

pub mod compositor;
pub mod hsv;
pub mod mask;

pub use compositor::{BackgroundImage, FrameCompositor};
pub use hsv::{Hsv, HsvFrame};
pub use mask::{HsvBound, KeyMaskGenerator, Mask};
