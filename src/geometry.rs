//! Geometry value types
//!
//! Page space is PDF "user space": points, origin at the bottom-left corner.
//! Device space is integer pixels, origin at the top-left of the viewport.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Rectangle in page space
///
/// Fields carry their semantics, not the engine's wire order: the engine
/// reports character boxes as left, right, bottom, top and text rectangles as
/// left, top, right, bottom. Both are converted through the named
/// constructors below.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Build from the engine's character-box order `[left, right, bottom, top]`
    pub fn from_char_box(o: [f64; 4]) -> Self {
        Self {
            left: o[0] as f32,
            right: o[1] as f32,
            bottom: o[2] as f32,
            top: o[3] as f32,
        }
    }

    /// Build from the engine's text-rect order `[left, top, right, bottom]`
    pub fn from_ltrb(o: [f64; 4]) -> Self {
        Self {
            left: o[0] as f32,
            top: o[1] as f32,
            right: o[2] as f32,
            bottom: o[3] as f32,
        }
    }

    pub fn width(&self) -> f32 {
        (self.right - self.left).abs()
    }

    pub fn height(&self) -> f32 {
        (self.top - self.bottom).abs()
    }

    /// Whether a page-space point lies inside (edges inclusive)
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let (lo_x, hi_x) = ordered(self.left, self.right);
        let (lo_y, hi_y) = ordered(self.bottom, self.top);
        x >= lo_x && x <= hi_x && y >= lo_y && y <= hi_y
    }
}

fn ordered(a: f32, b: f32) -> (f32, f32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Page size in pixels at a given DPI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSize {
    pub width: i32,
    pub height: i32,
}

/// Display area in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    /// Left pixel position of the display area
    pub x: i32,
    /// Top pixel position of the display area
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Page orientation on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Rotation {
    #[default]
    None,
    /// Rotated 90 degrees clockwise
    Clockwise90,
    /// Rotated 180 degrees
    Half,
    /// Rotated 90 degrees counter-clockwise
    CounterClockwise90,
}

impl Rotation {
    /// Engine encoding (0..=3)
    pub fn as_engine(self) -> i32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 1,
            Rotation::Half => 2,
            Rotation::CounterClockwise90 => 3,
        }
    }
}

impl TryFrom<i32> for Rotation {
    type Error = CoreError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Rotation::None),
            1 => Ok(Rotation::Clockwise90),
            2 => Ok(Rotation::Half),
            3 => Ok(Rotation::CounterClockwise90),
            other => Err(CoreError::InvalidRotation(other)),
        }
    }
}

/// Point in device space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePoint {
    pub x: i32,
    pub y: i32,
}

/// Rectangle in device space, assembled from two independently mapped corners
///
/// `left`/`top` come from the page-space top-left corner and `right`/`bottom`
/// from the bottom-right one. Under rotation they may be swapped; callers
/// normalize if they need to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl DeviceRect {
    pub fn from_corners(top_left: DevicePoint, bottom_right: DevicePoint) -> Self {
        Self {
            left: top_left.x,
            top: top_left.y,
            right: bottom_right.x,
            bottom: bottom_right.y,
        }
    }

    /// Same rectangle with `left <= right` and `top <= bottom`
    pub fn normalized(&self) -> Self {
        Self {
            left: self.left.min(self.right),
            top: self.top.min(self.bottom),
            right: self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_box_field_semantics() {
        // engine order: left, right, bottom, top
        let r = Rect::from_char_box([10.0, 16.0, 700.0, 710.0]);
        assert_eq!(r.left, 10.0);
        assert_eq!(r.right, 16.0);
        assert_eq!(r.bottom, 700.0);
        assert_eq!(r.top, 710.0);
        assert_eq!(r.width(), 6.0);
        assert_eq!(r.height(), 10.0);
    }

    #[test]
    fn test_ltrb_order() {
        let r = Rect::from_ltrb([1.0, 9.0, 5.0, 3.0]);
        assert_eq!(r, Rect::new(1.0, 9.0, 5.0, 3.0));
        assert!(r.contains(2.0, 4.0));
        assert!(!r.contains(6.0, 4.0));
    }

    #[test]
    fn test_rotation_try_from() {
        assert_eq!(Rotation::try_from(1).unwrap(), Rotation::Clockwise90);
        assert_eq!(Rotation::try_from(3).unwrap().as_engine(), 3);
        assert!(matches!(
            Rotation::try_from(4),
            Err(CoreError::InvalidRotation(4))
        ));
    }

    #[test]
    fn test_device_rect_normalized() {
        let rect =
            DeviceRect::from_corners(DevicePoint { x: 90, y: 10 }, DevicePoint { x: 20, y: 80 });
        let n = rect.normalized();
        assert_eq!((n.left, n.top, n.right, n.bottom), (20, 10, 90, 80));
    }
}
