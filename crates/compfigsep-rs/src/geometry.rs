//! Integer box geometry: area, intersection, IoU.
//!
//! Boxes use the `[xmin, ymin, xmax, ymax]` convention with continuous
//! extents, so a box `[0, 0, 10, 10]` has an area of 100.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl BBox {
    /// Build a box, swapping inverted corners so that `xmin <= xmax` and `ymin <= ymax`.
    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        BBox {
            xmin: xmin.min(xmax),
            ymin: ymin.min(ymax),
            xmax: xmin.max(xmax),
            ymax: ymin.max(ymax),
        }
    }

    /// Round a floating-point `[x1, y1, x2, y2]` model box to pixel coordinates.
    pub fn from_xyxy(xyxy: [f64; 4]) -> Self {
        BBox::new(
            xyxy[0].round() as i32,
            xyxy[1].round() as i32,
            xyxy[2].round() as i32,
            xyxy[3].round() as i32,
        )
    }

    pub fn width(&self) -> i64 {
        self.xmax as i64 - self.xmin as i64
    }

    pub fn height(&self) -> i64 {
        self.ymax as i64 - self.ymin as i64
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// Area of the overlap between two boxes (0 when disjoint).
    pub fn intersection_area(&self, other: &BBox) -> i64 {
        let x1 = self.xmin.max(other.xmin);
        let y1 = self.ymin.max(other.ymin);
        let x2 = self.xmax.min(other.xmax);
        let y2 = self.ymax.min(other.ymax);
        if x2 <= x1 || y2 <= y1 {
            return 0;
        }
        (x2 as i64 - x1 as i64) * (y2 as i64 - y1 as i64)
    }

    /// Intersection over union. Degenerate boxes with an empty union give 0.
    pub fn iou(&self, other: &BBox) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            0.0
        } else {
            inter as f64 / union as f64
        }
    }

    /// Fraction of `self` covered by `other`.
    pub fn overlap_ratio(&self, other: &BBox) -> f64 {
        let a = self.area();
        if a <= 0 {
            return 0.0;
        }
        self.intersection_area(other) as f64 / a as f64
    }
}

impl From<[i32; 4]> for BBox {
    fn from(b: [i32; 4]) -> Self {
        BBox::new(b[0], b[1], b[2], b[3])
    }
}

impl From<BBox> for [i32; 4] {
    fn from(b: BBox) -> Self {
        [b.xmin, b.ymin, b.xmax, b.ymax]
    }
}

/// Compute the D×G IoU matrix between detections and ground truths.
pub fn iou_matrix(dt: &[BBox], gt: &[BBox]) -> Vec<Vec<f64>> {
    dt.iter()
        .map(|d| gt.iter().map(|g| d.iou(g)).collect())
        .collect()
}
