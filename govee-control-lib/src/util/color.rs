use serde::{Deserialize, Serialize};

/**
An RGB color triple as Govee devices understand it.

Both the local `colorwc` command and the cloud `color` command carry this
exact `{"r":..,"g":..,"b":..}` shape, so the same type serves both wire
formats. Channels are normalized modulo 256 at construction, so out-of-range
and negative inputs wrap instead of erroring.
*/
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    #[serde(default)]
    pub r: u8,
    #[serde(default)]
    pub g: u8,
    #[serde(default)]
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };

    /// Builds a color from signed channel values, wrapping each modulo 256.
    ///
    /// The modulo is Euclidean, so `-5` maps to `251`, not `-5 % 256`.
    pub fn new(r: i32, g: i32, b: i32) -> Self {
        Color {
            r: wrap_channel(r),
            g: wrap_channel(g),
            b: wrap_channel(b),
        }
    }
}

fn wrap_channel(value: i32) -> u8 {
    value.rem_euclid(256) as u8
}

impl From<(u8, u8, u8)> for Color {
    fn from(tuple: (u8, u8, u8)) -> Self {
        Color {
            r: tuple.0,
            g: tuple.1,
            b: tuple.2,
        }
    }
}

impl From<Color> for (u8, u8, u8) {
    fn from(color: Color) -> Self {
        (color.r, color.g, color.b)
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_range_channels_pass_through() {
        let color = Color::new(10, 20, 30);
        assert_eq!(color, Color { r: 10, g: 20, b: 30 });
    }

    #[test]
    fn test_out_of_range_channels_wrap() {
        let color = Color::new(300, -5, 10);
        assert_eq!(color, Color { r: 44, g: 251, b: 10 });
    }

    #[test]
    fn test_channel_boundaries() {
        assert_eq!(Color::new(256, 255, -256), Color { r: 0, g: 255, b: 0 });
        assert_eq!(Color::new(-1, 0, 511), Color { r: 255, g: 0, b: 255 });
    }

    #[test]
    fn test_default_is_black() {
        assert_eq!(Color::default(), Color::BLACK);
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(Color::new(44, 251, 10)).unwrap();
        assert_eq!(json, serde_json::json!({"r": 44, "g": 251, "b": 10}));
    }

    #[test]
    fn test_missing_channels_default_to_zero() {
        let color: Color = serde_json::from_str(r#"{"r": 7}"#).unwrap();
        assert_eq!(color, Color { r: 7, g: 0, b: 0 });
    }
}
