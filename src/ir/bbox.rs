//! Bounding box types.
//!
//! Two representations are used:
//! - [`PixelBox`]: XYXY corners in image pixel space, as produced by the detector.
//! - [`NormalizedBox`]: center/size in `[0, 1]`, as stored in annotations and
//!   written to label files.
//!
//! Both have validated constructors: unlike a general-purpose annotation IR,
//! nothing downstream of these types is expected to cope with malformed boxes.

use serde::{Deserialize, Serialize};

use crate::error::ShrinkError;

/// Slack allowed when checking that a normalized box stays inside the image.
const EDGE_TOLERANCE: f64 = 1e-9;

/// An axis-aligned box in pixel space with `x1 < x2` and `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PixelBox {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
}

impl PixelBox {
    /// Creates a box from corner coordinates, rejecting non-finite or
    /// unordered/degenerate corners.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<Self, ShrinkError> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(ShrinkError::InvalidDetection {
                message: format!("non-finite bbox ({x1}, {y1}, {x2}, {y2})"),
            });
        }
        if x1 >= x2 || y1 >= y2 {
            return Err(ShrinkError::InvalidDetection {
                message: format!("bbox ({x1}, {y1}, {x2}, {y2}) must satisfy x1 < x2 and y1 < y2"),
            });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Creates a box from a `[x1, y1, x2, y2]` array.
    pub fn from_array(coords: [f64; 4]) -> Result<Self, ShrinkError> {
        Self::new(coords[0], coords[1], coords[2], coords[3])
    }

    #[inline]
    pub fn x1(&self) -> f64 {
        self.x1
    }

    #[inline]
    pub fn y1(&self) -> f64 {
        self.y1
    }

    #[inline]
    pub fn x2(&self) -> f64 {
        self.x2
    }

    #[inline]
    pub fn y2(&self) -> f64 {
        self.y2
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Converts to a normalized center/size box for an image of the given size.
    ///
    /// The box is clipped to the image first, since detectors may report
    /// boxes that spill slightly past the frame edge.
    pub fn to_normalized(
        &self,
        image_width: u32,
        image_height: u32,
    ) -> Result<NormalizedBox, ShrinkError> {
        let (w, h) = (image_width as f64, image_height as f64);
        if w <= 0.0 || h <= 0.0 {
            return Err(ShrinkError::InvalidAnnotation {
                message: format!("cannot normalize against a {image_width}x{image_height} image"),
            });
        }
        let x1 = self.x1.clamp(0.0, w);
        let x2 = self.x2.clamp(0.0, w);
        let y1 = self.y1.clamp(0.0, h);
        let y2 = self.y2.clamp(0.0, h);
        NormalizedBox::new(
            (x1 + x2) / 2.0 / w,
            (y1 + y2) / 2.0 / h,
            (x2 - x1) / w,
            (y2 - y1) / h,
        )
    }
}

impl<'de> Deserialize<'de> for PixelBox {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct PixelBoxData {
            x1: f64,
            y1: f64,
            x2: f64,
            y2: f64,
        }
        let data = PixelBoxData::deserialize(deserializer)?;
        PixelBox::new(data.x1, data.y1, data.x2, data.y2).map_err(serde::de::Error::custom)
    }
}

/// A box in normalized center/size form: `(x_center, y_center, width, height)`.
///
/// Every component lies in `[0, 1]`, width and height are positive, and the
/// box does not extend past the image edges.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct NormalizedBox {
    x_center: f64,
    y_center: f64,
    width: f64,
    height: f64,
}

impl NormalizedBox {
    /// Creates a normalized box, enforcing the `[0, 1]` range invariants.
    pub fn new(x_center: f64, y_center: f64, width: f64, height: f64) -> Result<Self, ShrinkError> {
        let values = [x_center, y_center, width, height];
        if !values.iter().all(|v| v.is_finite()) {
            return Err(ShrinkError::InvalidAnnotation {
                message: format!(
                    "non-finite bbox ({x_center}, {y_center}, {width}, {height})"
                ),
            });
        }
        if !values.iter().all(|v| (0.0..=1.0).contains(v)) {
            return Err(ShrinkError::InvalidAnnotation {
                message: format!(
                    "bbox ({x_center}, {y_center}, {width}, {height}) has components outside [0, 1]"
                ),
            });
        }
        if width <= 0.0 || height <= 0.0 {
            return Err(ShrinkError::InvalidAnnotation {
                message: format!("bbox width {width} and height {height} must be positive"),
            });
        }

        let (xmin, xmax) = (x_center - width / 2.0, x_center + width / 2.0);
        let (ymin, ymax) = (y_center - height / 2.0, y_center + height / 2.0);
        if xmin < -EDGE_TOLERANCE
            || ymin < -EDGE_TOLERANCE
            || xmax > 1.0 + EDGE_TOLERANCE
            || ymax > 1.0 + EDGE_TOLERANCE
        {
            return Err(ShrinkError::InvalidAnnotation {
                message: format!(
                    "bbox ({x_center}, {y_center}, {width}, {height}) extends outside the image"
                ),
            });
        }

        Ok(Self {
            x_center,
            y_center,
            width,
            height,
        })
    }

    #[inline]
    pub fn x_center(&self) -> f64 {
        self.x_center
    }

    #[inline]
    pub fn y_center(&self) -> f64 {
        self.y_center
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.height
    }

    /// Returns `(x_center, y_center, width, height)`.
    #[inline]
    pub fn to_cxcywh(&self) -> (f64, f64, f64, f64) {
        (self.x_center, self.y_center, self.width, self.height)
    }

    /// Returns normalized `(xmin, ymin, xmax, ymax)` corners.
    pub fn to_xyxy(&self) -> (f64, f64, f64, f64) {
        (
            self.x_center - self.width / 2.0,
            self.y_center - self.height / 2.0,
            self.x_center + self.width / 2.0,
            self.y_center + self.height / 2.0,
        )
    }
}

impl<'de> Deserialize<'de> for NormalizedBox {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct NormalizedBoxData {
            x_center: f64,
            y_center: f64,
            width: f64,
            height: f64,
        }
        let data = NormalizedBoxData::deserialize(deserializer)?;
        NormalizedBox::new(data.x_center, data.y_center, data.width, data.height)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_box_rejects_unordered_corners() {
        assert!(PixelBox::new(10.0, 20.0, 100.0, 80.0).is_ok());
        assert!(PixelBox::new(100.0, 20.0, 10.0, 80.0).is_err());
        assert!(PixelBox::new(10.0, 20.0, 10.0, 80.0).is_err());
        assert!(PixelBox::new(f64::NAN, 20.0, 100.0, 80.0).is_err());
    }

    #[test]
    fn pixel_box_dimensions() {
        let bbox = PixelBox::new(10.0, 20.0, 100.0, 80.0).unwrap();
        assert_eq!(bbox.width(), 90.0);
        assert_eq!(bbox.height(), 60.0);
        assert_eq!(bbox.area(), 5400.0);
    }

    #[test]
    fn pixel_box_normalizes_with_clipping() {
        let bbox = PixelBox::new(-10.0, 0.0, 50.0, 50.0).unwrap();
        let norm = bbox.to_normalized(100, 100).unwrap();
        let (cx, cy, w, h) = norm.to_cxcywh();
        assert!((cx - 0.25).abs() < 1e-12);
        assert!((cy - 0.25).abs() < 1e-12);
        assert!((w - 0.5).abs() < 1e-12);
        assert!((h - 0.5).abs() < 1e-12);
    }

    #[test]
    fn normalized_box_enforces_range() {
        assert!(NormalizedBox::new(0.5, 0.5, 1.0, 1.0).is_ok());
        assert!(NormalizedBox::new(0.5, 0.5, 0.0, 0.2).is_err());
        assert!(NormalizedBox::new(1.2, 0.5, 0.1, 0.1).is_err());
        assert!(NormalizedBox::new(0.95, 0.5, 0.2, 0.1).is_err());
        assert!(NormalizedBox::new(0.5, f64::INFINITY, 0.1, 0.1).is_err());
    }

    #[test]
    fn normalized_box_deserialize_validates() {
        let ok: Result<NormalizedBox, _> =
            serde_json::from_str(r#"{"x_center":0.5,"y_center":0.5,"width":0.2,"height":0.2}"#);
        assert!(ok.is_ok());

        let bad: Result<NormalizedBox, _> =
            serde_json::from_str(r#"{"x_center":0.5,"y_center":0.5,"width":-0.2,"height":0.2}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn normalized_box_corners() {
        let bbox = NormalizedBox::new(0.5, 0.4, 0.2, 0.4).unwrap();
        let (xmin, ymin, xmax, ymax) = bbox.to_xyxy();
        assert!((xmin - 0.4).abs() < 1e-12);
        assert!((ymin - 0.2).abs() < 1e-12);
        assert!((xmax - 0.6).abs() < 1e-12);
        assert!((ymax - 0.6).abs() < 1e-12);
    }
}
