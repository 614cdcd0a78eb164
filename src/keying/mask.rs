use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::keying::hsv::{Hsv, HsvFrame};

/// One corner of the key color box in HSV space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvBound {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl HsvBound {
    /// Largest meaningful hue bound (hue is stored in half-degrees)
    pub const MAX_HUE: u8 = 180;

    /// Lower corner of a mid-range green backdrop
    pub const DEFAULT_LOWER: Self = Self::new(40, 230, 200);

    /// Upper corner of a mid-range green backdrop
    pub const DEFAULT_UPPER: Self = Self::new(80, 255, 255);

    pub const fn new(h: u8, s: u8, v: u8) -> Self {
        Self { h, s, v }
    }
}

impl fmt::Display for HsvBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.h, self.s, self.v)
    }
}

/// Parses `"h,s,v"`, the form the CLI accepts
impl FromStr for HsvBound {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = input.split(',').map(str::trim).collect();
        let &[h, s, v] = parts.as_slice() else {
            return Err(format!("expected H,S,V but got '{input}'"));
        };
        let component = |name: &str, value: &str| {
            value
                .parse::<u8>()
                .map_err(|_| format!("{name} component '{value}' is not in 0..=255"))
        };
        Ok(Self::new(component("H", h)?, component("S", s)?, component("V", v)?))
    }
}

/// Per-pixel "is key color" flags, same dimensions as the frame they came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    keyed: Vec<bool>,
}

impl Mask {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_key(&self, x: u32, y: u32) -> bool {
        self.keyed[y as usize * self.width as usize + x as usize]
    }

    /// Flags in row-major order
    pub fn as_slice(&self) -> &[bool] {
        &self.keyed
    }

    pub fn key_count(&self) -> usize {
        self.keyed.iter().filter(|k| **k).count()
    }
}

/// Classifies pixels against an inclusive HSV box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyMaskGenerator {
    lower: HsvBound,
    upper: HsvBound,
}

impl Default for KeyMaskGenerator {
    fn default() -> Self {
        Self::new(HsvBound::DEFAULT_LOWER, HsvBound::DEFAULT_UPPER)
    }
}

impl KeyMaskGenerator {
    pub fn new(lower: HsvBound, upper: HsvBound) -> Self {
        Self { lower, upper }
    }

    pub fn lower(&self) -> HsvBound {
        self.lower
    }

    pub fn upper(&self) -> HsvBound {
        self.upper
    }

    /// Every component within its bound, inclusive. No partial membership.
    pub fn is_key(&self, pixel: Hsv) -> bool {
        (self.lower.h..=self.upper.h).contains(&pixel.h)
            && (self.lower.s..=self.upper.s).contains(&pixel.s)
            && (self.lower.v..=self.upper.v).contains(&pixel.v)
    }

    pub fn generate(&self, frame: &HsvFrame) -> Mask {
        Mask {
            width: frame.width(),
            height: frame.height(),
            keyed: frame.pixels().map(|p| self.is_key(p)).collect(),
        }
    }
}
