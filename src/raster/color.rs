use std::sync::LazyLock;

use regex::Regex;

use crate::core::domain::Rgb;

static CSS_RGB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^rgb\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*\)$").expect("valid")
});

const NAMED: &[(&str, Rgb)] = &[
    ("black", Rgb(0, 0, 0)),
    ("white", Rgb(255, 255, 255)),
    ("red", Rgb(255, 0, 0)),
    ("green", Rgb(0, 128, 0)),
    ("lime", Rgb(0, 255, 0)),
    ("blue", Rgb(0, 0, 255)),
    ("yellow", Rgb(255, 255, 0)),
    ("cyan", Rgb(0, 255, 255)),
    ("aqua", Rgb(0, 255, 255)),
    ("magenta", Rgb(255, 0, 255)),
    ("fuchsia", Rgb(255, 0, 255)),
    ("purple", Rgb(128, 0, 128)),
    ("orange", Rgb(255, 165, 0)),
    ("pink", Rgb(255, 192, 203)),
    ("brown", Rgb(165, 42, 42)),
    ("gray", Rgb(128, 128, 128)),
    ("grey", Rgb(128, 128, 128)),
    ("lightgray", Rgb(211, 211, 211)),
    ("lightgrey", Rgb(211, 211, 211)),
    ("darkgray", Rgb(169, 169, 169)),
    ("darkgrey", Rgb(169, 169, 169)),
    ("silver", Rgb(192, 192, 192)),
    ("navy", Rgb(0, 0, 128)),
    ("teal", Rgb(0, 128, 128)),
    ("olive", Rgb(128, 128, 0)),
    ("maroon", Rgb(128, 0, 0)),
    ("violet", Rgb(238, 130, 238)),
    ("indigo", Rgb(75, 0, 130)),
    ("gold", Rgb(255, 215, 0)),
    ("coral", Rgb(255, 127, 80)),
    ("salmon", Rgb(250, 128, 114)),
    ("tomato", Rgb(255, 99, 71)),
    ("crimson", Rgb(220, 20, 60)),
    ("turquoise", Rgb(64, 224, 208)),
    ("skyblue", Rgb(135, 206, 235)),
    ("lightblue", Rgb(173, 216, 230)),
    ("darkblue", Rgb(0, 0, 139)),
    ("darkgreen", Rgb(0, 100, 0)),
    ("lightgreen", Rgb(144, 238, 144)),
    ("darkred", Rgb(139, 0, 0)),
    ("beige", Rgb(245, 245, 220)),
    ("tan", Rgb(210, 180, 140)),
    ("khaki", Rgb(240, 230, 140)),
    ("lavender", Rgb(230, 230, 250)),
    ("chocolate", Rgb(210, 105, 30)),
    ("orchid", Rgb(218, 112, 214)),
    ("plum", Rgb(221, 160, 221)),
];

/// How numeric colour components are interpreted (`colormode(1.0)` vs `colormode(255)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorMode {
    Unit,
    Byte,
}

/// Parses a colour given as a name, `#rgb`, `#rrggbb` or `rgb(r, g, b)`.
pub fn parse_color(spec: &str) -> Option<Rgb> {
    let spec = spec.trim();
    if let Some(hex) = spec.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(caps) = CSS_RGB.captures(spec) {
        let channel = |i: usize| caps[i].parse::<u16>().ok().filter(|v| *v <= 255);
        return Some(Rgb(channel(1)? as u8, channel(2)? as u8, channel(3)? as u8));
    }
    let lowered: String = spec
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    NAMED
        .iter()
        .find(|(name, _)| *name == lowered)
        .map(|(_, rgb)| *rgb)
}

fn parse_hex(hex: &str) -> Option<Rgb> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        3 => {
            let digit = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|d| d * 17);
            Some(Rgb(digit(0)?, digit(1)?, digit(2)?))
        }
        6 => {
            let pair = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            Some(Rgb(pair(0)?, pair(2)?, pair(4)?))
        }
        _ => None,
    }
}

/// Converts numeric components; out of range components are rejected like
/// turtle's "bad color sequence".
pub fn from_components(r: f64, g: f64, b: f64, mode: ColorMode) -> Option<Rgb> {
    let scale = match mode {
        ColorMode::Unit => 255.0,
        ColorMode::Byte => 1.0,
    };
    let limit = match mode {
        ColorMode::Unit => 1.0,
        ColorMode::Byte => 255.0,
    };
    let channel = |v: f64| {
        if v.is_finite() && (0.0..=limit).contains(&v) {
            Some((v * scale).round() as u8)
        } else {
            None
        }
    };
    Some(Rgb(channel(r)?, channel(g)?, channel(b)?))
}

/// Name for known colours, `#rrggbb` otherwise.
pub fn describe(rgb: Rgb) -> String {
    NAMED
        .iter()
        .find(|(_, named)| *named == rgb)
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| format!("#{:02x}{:02x}{:02x}", rgb.0, rgb.1, rgb.2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formats() {
        assert_eq!(parse_color("Red"), Some(Rgb(255, 0, 0)));
        assert_eq!(parse_color("light blue"), Some(Rgb(173, 216, 230)));
        assert_eq!(parse_color("#0f0"), Some(Rgb(0, 255, 0)));
        assert_eq!(parse_color("#1a2B3c"), Some(Rgb(0x1a, 0x2b, 0x3c)));
        assert_eq!(parse_color("rgb(10, 20, 30)"), Some(Rgb(10, 20, 30)));
        assert_eq!(parse_color("rgb(300, 20, 30)"), None);
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("blurple"), None);
    }

    #[test]
    fn test_components_respect_mode() {
        assert_eq!(from_components(1.0, 0.5, 0.0, ColorMode::Unit), Some(Rgb(255, 128, 0)));
        assert_eq!(from_components(255.0, 128.0, 0.0, ColorMode::Byte), Some(Rgb(255, 128, 0)));
        assert_eq!(from_components(255.0, 0.0, 0.0, ColorMode::Unit), None);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(Rgb::BLACK), "black");
        assert_eq!(describe(Rgb(1, 2, 3)), "#010203");
    }
}
