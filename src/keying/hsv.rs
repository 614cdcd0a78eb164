//! RGB ⇄ HSV conversion.
//!
//! Uses the 8-bit convention the default key bounds are tuned for:
//!
//! - `V = max(R, G, B)`
//! - `S = round(255 * (V - min) / V)`, `0` when `V == 0`
//! - `H = round(hue_degrees / 2)`, in `0..=179`, `0` when the pixel is grey
//!
//! Everything is integer arithmetic with round-half-away-from-zero, so the
//! output is identical on every platform.

use crate::video::Frame;

/// One HSV pixel: hue in half-degrees, saturation and value in `0..=255`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

/// A frame converted to HSV, same dimensions and layout as its source
#[derive(Debug, Clone, PartialEq)]
pub struct HsvFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl HsvFrame {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Hsv {
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        Hsv {
            h: self.data[offset],
            s: self.data[offset + 1],
            v: self.data[offset + 2],
        }
    }

    /// Pixels in row-major order
    pub fn pixels(&self) -> impl Iterator<Item = Hsv> + '_ {
        self.data.chunks_exact(3).map(|p| Hsv { h: p[0], s: p[1], v: p[2] })
    }
}

/// Convert a whole frame to HSV
pub fn convert(frame: &Frame) -> HsvFrame {
    let mut data = Vec::with_capacity(frame.as_bytes().len());
    for pixel in frame.as_bytes().chunks_exact(3) {
        let hsv = rgb_to_hsv([pixel[0], pixel[1], pixel[2]]);
        data.extend_from_slice(&[hsv.h, hsv.s, hsv.v]);
    }

    HsvFrame {
        width: frame.width(),
        height: frame.height(),
        data,
    }
}

pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> Hsv {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;

    let s = if v == 0 { 0 } else { div_round(255 * delta, v) };

    let h = if delta == 0 {
        0
    } else {
        // 60 degrees per sector is 30 half-degrees
        let h = if v == r {
            div_round(30 * (g - b), delta)
        } else if v == g {
            60 + div_round(30 * (b - r), delta)
        } else {
            120 + div_round(30 * (r - g), delta)
        };
        h.rem_euclid(180)
    };

    Hsv {
        h: h as u8,
        s: s as u8,
        v: v as u8,
    }
}

/// Inverse of [`rgb_to_hsv`], up to rounding
pub fn hsv_to_rgb(hsv: Hsv) -> [u8; 3] {
    let h = f32::from(hsv.h) * 2.0;
    let s = f32::from(hsv.s) / 255.0;
    let v = f32::from(hsv.v) / 255.0;

    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    [
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
    ]
}

fn div_round(num: i32, den: i32) -> i32 {
    if num >= 0 {
        (num + den / 2) / den
    } else {
        -((-num + den / 2) / den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hue is quantised to 2 degrees, which costs up to ~4.3 units on a full-range channel
    const ROUND_TRIP_TOLERANCE: i16 = 6;

    fn hsv(h: u8, s: u8, v: u8) -> Hsv {
        Hsv { h, s, v }
    }

    #[test]
    fn test_primary_colors() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), hsv(0, 255, 255));
        assert_eq!(rgb_to_hsv([0, 255, 0]), hsv(60, 255, 255));
        assert_eq!(rgb_to_hsv([0, 0, 255]), hsv(120, 255, 255));
    }

    #[test]
    fn test_greys_have_no_hue_or_saturation() {
        assert_eq!(rgb_to_hsv([0, 0, 0]), hsv(0, 0, 0));
        assert_eq!(rgb_to_hsv([128, 128, 128]), hsv(0, 0, 128));
        assert_eq!(rgb_to_hsv([255, 255, 255]), hsv(0, 0, 255));
    }

    #[test]
    fn test_hue_wraps_below_red() {
        // Magenta-ish red: hue just under 360 degrees lands near 179, never 180
        let h = rgb_to_hsv([255, 0, 5]).h;
        assert!(h == 179 || h == 0, "unexpected hue {h}");
        assert!(rgb_to_hsv([255, 0, 1]).h < 180);
    }

    #[test]
    fn test_broadcast_green_sits_inside_default_key() {
        // What a yuv420p round trip typically does to pure green
        let p = rgb_to_hsv([0, 255, 1]);
        assert_eq!(p.h, 60);
        assert_eq!(p.s, 255);
        assert_eq!(p.v, 255);
    }

    #[test]
    fn test_round_trip_within_tolerance() {
        let samples = [
            [255, 0, 0],
            [0, 255, 0],
            [0, 0, 255],
            [12, 200, 34],
            [250, 128, 7],
            [90, 30, 160],
            [200, 200, 10],
            [1, 2, 3],
            [255, 255, 255],
            [64, 64, 64],
            [17, 240, 230],
        ];

        for rgb in samples {
            let back = hsv_to_rgb(rgb_to_hsv(rgb));
            for channel in 0..3 {
                let diff = (i16::from(rgb[channel]) - i16::from(back[channel])).abs();
                assert!(
                    diff <= ROUND_TRIP_TOLERANCE,
                    "{rgb:?} came back as {back:?}"
                );
            }
        }
    }

    #[test]
    fn test_convert_keeps_dimensions_and_order() {
        let mut frame = Frame::new_filled(4, 3, [0, 0, 0]);
        frame.set_pixel(3, 2, [0, 255, 0]);

        let converted = convert(&frame);
        assert_eq!(converted.dimensions(), (4, 3));
        assert_eq!(converted.get_pixel(3, 2), hsv(60, 255, 255));
        assert_eq!(converted.get_pixel(0, 0), hsv(0, 0, 0));
        assert_eq!(converted.pixels().count(), 12);
    }
}
