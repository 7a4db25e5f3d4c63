//! Shared geometry types used across the registry and the WM layer.

use serde::{Deserialize, Serialize};

/// A rectangle in root (or parent) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether the point lies inside the rectangle
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Geometry of a window as last configured.
///
/// Mirrors the X `configure` fields the toolkit tracks for every window:
/// position relative to the parent, size, and border width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub border_width: i32,
}

impl Default for Changes {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            border_width: 0,
        }
    }
}

impl Changes {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Window gravity, as carried in `WM_NORMAL_HINTS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gravity {
    #[default]
    NorthWest,
    North,
    NorthEast,
    West,
    Center,
    East,
    SouthWest,
    South,
    SouthEast,
    Static,
}

impl Gravity {
    pub fn to_x11(self) -> x11rb::protocol::xproto::Gravity {
        use x11rb::protocol::xproto::Gravity as G;
        match self {
            Gravity::NorthWest => G::NORTH_WEST,
            Gravity::North => G::NORTH,
            Gravity::NorthEast => G::NORTH_EAST,
            Gravity::West => G::WEST,
            Gravity::Center => G::CENTER,
            Gravity::East => G::EAST,
            Gravity::SouthWest => G::SOUTH_WEST,
            Gravity::South => G::SOUTH,
            Gravity::SouthEast => G::SOUTH_EAST,
            Gravity::Static => G::STATIC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_contains() {
        let rect = Rect::new(10, 20, 100, 50);
        assert!(rect.contains(10, 20));
        assert!(rect.contains(109, 69));
        assert!(!rect.contains(110, 20));
        assert!(!rect.contains(9, 30));
    }

    #[test]
    fn test_default_changes_are_one_pixel() {
        let changes = Changes::default();
        assert_eq!(changes.rect(), Rect::new(0, 0, 1, 1));
        assert_eq!(changes.border_width, 0);
    }
}
