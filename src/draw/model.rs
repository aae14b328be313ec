use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in canvas-local logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn scaled(self, scale: f32) -> Self {
        Self {
            x: self.x * scale,
            y: self.y * scale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    #[default]
    Brush,
    Eraser,
}

/// Straight (non-premultiplied) RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Self = Self::rgba(0, 0, 0, 0);
    pub const BLACK: Self = Self::rgba(0, 0, 0, 255);
    pub const WHITE: Self = Self::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Parses `#rgb`, `#rrggbb` or `#rrggbbaa`. The leading `#` is optional.
    pub fn from_hex(input: &str) -> Option<Self> {
        let digits = input.trim();
        let digits = digits.strip_prefix('#').unwrap_or(digits);
        let expanded;
        let digits = if digits.len() == 3 {
            expanded = digits.chars().flat_map(|c| [c, c]).collect::<String>();
            expanded.as_str()
        } else {
            digits
        };
        let bytes = hex::decode(digits).ok()?;
        match bytes.as_slice() {
            [r, g, b] => Some(Self::rgba(*r, *g, *b, 255)),
            [r, g, b, a] => Some(Self::rgba(*r, *g, *b, *a)),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{}", hex::encode([self.r, self.g, self.b]))
        } else {
            format!("#{}", hex::encode(self.to_array()))
        }
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Rgba {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgba {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Rgba::from_hex(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex colour {raw:?}")))
    }
}

/// Tool, colour and width captured when a stroke begins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub tool: Tool,
    pub color: Rgba,
    pub width: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrokeId(pub u64);

impl fmt::Display for StrokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stroke-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub id: StrokeId,
    pub style: StrokeStyle,
    pub points: Vec<Point>,
}

/// Sealed strokes in recording order plus at most one open stroke.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InkLayer {
    pub sealed: Vec<Stroke>,
    pub active: Option<Stroke>,
}

impl InkLayer {
    pub fn is_empty(&self) -> bool {
        self.sealed.is_empty() && self.active.is_none()
    }

    /// Sealed strokes first, then the open stroke.
    pub fn strokes(&self) -> impl Iterator<Item = &Stroke> {
        self.sealed.iter().chain(self.active.iter())
    }

    pub fn clear(&mut self) {
        self.sealed.clear();
        self.active = None;
    }
}
