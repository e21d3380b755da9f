//! Colour helpers shared by the recolour engine and the dominant colour extractor.
//!
//! Everything here is pure. The lenient [`from_hex`] never fails: malformed input decodes to
//! whatever the leading hex digits spell (black when there are none). Use [`Colour::from_str`] or
//! [`parse_css`] where input has not been validated upstream.

use std::fmt;
use std::str::FromStr;

use css_color::Srgb;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ColourError {
    #[error("invalid hex colour '{0}' (expected 6 hex digits with optional '#')")]
    InvalidHex(String),
    #[error("invalid css colour '{0}'")]
    InvalidCss(String),
}

/// An opaque RGB triple. Channel range is enforced by the `u8` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Colour {
    pub const BLACK: Colour = Colour::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Decode the low 24 bits of `value` as `0xRRGGBB`.
    pub const fn from_packed(value: u32) -> Self {
        Self {
            r: ((value >> 16) & 0xff) as u8,
            g: ((value >> 8) & 0xff) as u8,
            b: (value & 0xff) as u8,
        }
    }

    pub fn channels(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// `#rrggbb`, lower case.
    pub fn to_hex(self) -> String {
        to_hex(self.r, self.g, self.b)
    }

    /// Multiply every channel by `factor`, rounding halves up and saturating at the channel bounds.
    pub fn scaled(self, factor: f64) -> Self {
        let scale = |v: u8| (v as f64 * factor).round().clamp(0.0, 255.0) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

impl From<[u8; 3]> for Colour {
    fn from(c: [u8; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<Colour> for String {
    fn from(c: Colour) -> Self {
        c.to_hex()
    }
}

impl TryFrom<String> for Colour {
    type Error = ColourError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        parse_css(&s)
    }
}

/// Strict `#rrggbb` / `rrggbb` parsing.
impl FromStr for Colour {
    type Err = ColourError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('#').unwrap_or(s);
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ColourError::InvalidHex(s.to_string()));
        }
        Ok(from_hex(digits))
    }
}

/// Pack three channels into `#rrggbb`.
pub fn to_hex(r: u8, g: u8, b: u8) -> String {
    format!("#{}", rgb_to_hex(r, g, b))
}

/// Same as [`to_hex`] without the leading marker.
pub fn rgb_to_hex(r: u8, g: u8, b: u8) -> String {
    format!("{:02x}{:02x}{:02x}", r, g, b)
}

/// Lenient hex decoding. An optional `#` is stripped, then the longest run of leading hex digits
/// is read as an integer whose low 24 bits are taken as `0xRRGGBB`. No digits decodes to black.
pub fn from_hex(s: &str) -> Colour {
    let digits = s.strip_prefix('#').unwrap_or(s);
    let value = digits
        .chars()
        .map_while(|c| c.to_digit(16))
        .fold(0u32, |acc, d| acc.wrapping_mul(16).wrapping_add(d));
    Colour::from_packed(value)
}

/// Parse any CSS colour (`red`, `#f00`, `#ff0000`, `rgb(255 0 0)`). Alpha is discarded.
pub fn parse_css(s: &str) -> Result<Colour, ColourError> {
    let s = s.trim();
    if let Ok(c) = s.parse::<Colour>() {
        return Ok(c);
    }
    let parsed = s
        .parse::<Srgb>()
        .map_err(|_| ColourError::InvalidCss(s.to_string()))?;
    let to_u8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    Ok(Colour::new(
        to_u8(parsed.red),
        to_u8(parsed.green),
        to_u8(parsed.blue),
    ))
}

/// Euclidean distance in RGB space, in `[0, 441.67]`.
#[inline]
pub fn distance(a: Colour, b: Colour) -> f64 {
    let dr = a.r as f64 - b.r as f64;
    let dg = a.g as f64 - b.g as f64;
    let db = a.b as f64 - b.b as f64;
    (dr * dr + dg * dg + db * db).sqrt()
}

/// Per-channel inclusive window test (an L∞ box, not a sphere).
#[inline(always)]
pub fn matches(r: u8, g: u8, b: u8, target: Colour, tolerance: u32) -> bool {
    (r.abs_diff(target.r) as u32) <= tolerance
        && (g.abs_diff(target.g) as u32) <= tolerance
        && (b.abs_diff(target.b) as u32) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips_every_channel_value() {
        for v in 0..=255u8 {
            for c in [
                Colour::new(v, 0, 0),
                Colour::new(0, v, 0),
                Colour::new(0, 0, v),
                Colour::new(v, 255 - v, v / 2),
            ] {
                assert_eq!(from_hex(&c.to_hex()), c);
                assert_eq!(from_hex(&rgb_to_hex(c.r, c.g, c.b)), c);
                assert_eq!(c.to_hex().parse::<Colour>().unwrap(), c);
            }
        }
    }

    #[test]
    fn hex_is_zero_padded_lower_case() {
        assert_eq!(to_hex(1, 2, 255), "#0102ff");
        assert_eq!(rgb_to_hex(0, 0, 0), "000000");
        assert_eq!(Colour::new(171, 205, 239).to_string(), "#abcdef");
    }

    #[test]
    fn lenient_hex_never_fails() {
        assert_eq!(from_hex("#zzzzzz"), Colour::BLACK);
        assert_eq!(from_hex(""), Colour::BLACK);
        // leading digits only, like an integer parse
        assert_eq!(from_hex("#12xx"), Colour::new(0, 0, 0x12));
        assert_eq!(from_hex("#abc"), Colour::new(0, 0x0a, 0xbc));
        assert_eq!(from_hex("FF8000"), Colour::new(255, 128, 0));
    }

    #[test]
    fn strict_hex_rejects_malformed() {
        assert!("#12345".parse::<Colour>().is_err());
        assert!("#12345g".parse::<Colour>().is_err());
        assert!("#1234567".parse::<Colour>().is_err());
        assert_eq!("ff0000".parse::<Colour>().unwrap(), Colour::new(255, 0, 0));
        assert_eq!("#1A2b3C".parse::<Colour>().unwrap(), Colour::new(0x1a, 0x2b, 0x3c));
        // strict parse agrees with the lenient decoder on well formed input
        assert_eq!(parse_css("#c86432").unwrap(), from_hex("#c86432"));
    }

    #[test]
    fn css_names_and_short_hex() {
        assert_eq!(parse_css("red").unwrap(), Colour::new(255, 0, 0));
        assert_eq!(parse_css("#0f0").unwrap(), Colour::new(0, 255, 0));
        assert_eq!(parse_css(" #0000ff ").unwrap(), Colour::new(0, 0, 255));
        assert!(matches!(
            parse_css("not-a-colour"),
            Err(ColourError::InvalidCss(_))
        ));
    }

    #[test]
    fn distance_properties() {
        let a = Colour::new(10, 20, 30);
        let b = Colour::new(13, 24, 30);
        assert_eq!(distance(a, a), 0.0);
        assert_eq!(distance(a, b), 5.0);
        assert_eq!(distance(a, b), distance(b, a));
        let max = distance(Colour::BLACK, Colour::new(255, 255, 255));
        assert!((max - 441.67).abs() < 0.01);
    }

    #[test]
    fn matches_is_reflexive_and_monotonic() {
        let t = Colour::new(100, 150, 200);
        assert!(matches(100, 150, 200, t, 0));
        assert!(!matches(101, 150, 200, t, 0));
        assert!(matches(110, 140, 200, t, 10));
        assert!(!matches(111, 140, 200, t, 10));
        for tol in 10..300 {
            assert!(matches(110, 140, 200, t, tol));
        }
        // corners of the box match; a sphere of the same radius would not contain them
        assert!(matches(110, 160, 210, t, 10));
    }

    #[test]
    fn scaled_rounds_halves_up() {
        assert_eq!(
            Colour::new(200, 100, 50).scaled(0.85),
            Colour::new(170, 85, 43)
        );
        // 8.5, 42.5 and 25.5 all round up
        assert_eq!(Colour::new(10, 50, 30).scaled(0.85), Colour::new(9, 43, 26));
        for v in (10..=250u8).step_by(20) {
            let expected = (v as u32 * 85).div_ceil(100) as u8;
            assert_eq!(Colour::new(v, 0, 0).scaled(0.85).r, expected, "channel {v}");
        }
        assert_eq!(Colour::new(255, 255, 255).scaled(2.0), Colour::new(255, 255, 255));
    }

    #[test]
    fn serde_uses_hex_strings() {
        let c: Colour = serde_json::from_str("\"magenta\"").unwrap();
        assert_eq!(c, Colour::new(255, 0, 255));
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"#ff00ff\"");
        assert!(serde_json::from_str::<Colour>("\"nope\"").is_err());
    }
}
