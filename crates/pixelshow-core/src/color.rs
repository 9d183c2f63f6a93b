//! Colors as they travel over the wire and onto the screen.

use crate::error::{CoreError, Result};
use palette::Srgb;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An sRGB color with 8-bit channels.
///
/// Serialized as a `#rrggbb` string. Parsing accepts `#rgb` and `#rrggbb`,
/// with or without the leading `#`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(Srgb<u8>);

impl Color {
    /// Create a color from 8-bit channels
    pub fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self(Srgb::new(red, green, blue))
    }

    /// The "off" color every effect falls back to
    pub fn black() -> Self {
        Self::rgb(0, 0, 0)
    }

    /// Full brightness, used for beat flashes and the indicator fallback
    pub fn white() -> Self {
        Self::rgb(255, 255, 255)
    }

    /// Channels as a tuple
    pub fn components(&self) -> (u8, u8, u8) {
        (self.0.red, self.0.green, self.0.blue)
    }

    /// Interpolate towards `to`. `t = 0` yields `self`, `t = 1` yields `to`.
    ///
    /// The mix happens on the encoded sRGB values, so half way between black
    /// and white is `#808080`.
    pub fn lerp(self, to: Color, t: f32) -> Color {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let channel = |a: u8, b: u8| {
            let (a, b) = (a as f32, b as f32);
            (a + (b - a) * t).round().clamp(0.0, 255.0) as u8
        };
        let (ar, ag, ab) = self.components();
        let (br, bg, bb) = to.components();
        Color::rgb(channel(ar, br), channel(ag, bg), channel(ab, bb))
    }

    /// `#rrggbb` representation
    pub fn to_hex(&self) -> String {
        let (r, g, b) = self.components();
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::black()
    }
}

impl FromStr for Color {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Srgb::<u8>::from_str(trimmed)
            .map(Color)
            .map_err(|e| CoreError::InvalidColor(format!("{:?}: {:?}", trimmed, e)))
    }
}

impl TryFrom<String> for Color {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_long_and_short_hex() {
        assert_eq!("#ff0000".parse::<Color>().unwrap(), Color::rgb(255, 0, 0));
        assert_eq!("00ff00".parse::<Color>().unwrap(), Color::rgb(0, 255, 0));
        assert_eq!("#fff".parse::<Color>().unwrap(), Color::white());
        assert_eq!("#000".parse::<Color>().unwrap(), Color::black());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("#zzzzzz".parse::<Color>().is_err());
        assert!("".parse::<Color>().is_err());
    }

    #[test]
    fn test_lerp_endpoints() {
        let a = Color::rgb(10, 20, 30);
        let b = Color::rgb(200, 100, 0);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        assert_eq!(Color::black().lerp(Color::white(), 0.5), Color::rgb(128, 128, 128));
    }

    #[test]
    fn test_lerp_clamps_factor() {
        let a = Color::black();
        let b = Color::white();
        assert_eq!(a.lerp(b, 3.0), b);
        assert_eq!(a.lerp(b, -1.0), a);
        assert_eq!(a.lerp(b, f32::NAN), a);
    }

    #[test]
    fn test_serde_uses_hex_strings() {
        let json = serde_json::to_string(&Color::rgb(255, 0, 128)).unwrap();
        assert_eq!(json, "\"#ff0080\"");

        let back: Color = serde_json::from_str("\"#ff0080\"").unwrap();
        assert_eq!(back, Color::rgb(255, 0, 128));
        assert!(serde_json::from_str::<Color>("\"red\"").is_err());
    }
}
