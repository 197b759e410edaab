use crate::geometry::{BBox, Contour, contour_overlaps_box};
use crate::types::{Color, RedactionLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Coverage {
    None,
    Partial,
    Full,
}

/// Redaction rectangles of one page, in default user space.
#[derive(Debug, Clone)]
pub(crate) struct RegionIndex {
    rects: Vec<BBox>,
    colors: Vec<Option<Color>>,
    extent: BBox,
}

impl RegionIndex {
    pub fn new(locations: &[RedactionLocation]) -> Self {
        let mut rects = Vec::with_capacity(locations.len());
        let mut colors = Vec::with_capacity(locations.len());
        let mut extent = BBox::empty();
        for loc in locations {
            if loc.rect.is_empty() {
                continue;
            }
            let bbox = loc.rect.to_bbox();
            extent = extent.union(&bbox);
            rects.push(bbox);
            colors.push(loc.color);
        }
        Self {
            rects,
            colors,
            extent,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[BBox] {
        &self.rects
    }

    /// Rectangles that carry an explicit overpaint color.
    pub fn colored(&self) -> impl Iterator<Item = (BBox, Color)> + '_ {
        self.rects
            .iter()
            .zip(self.colors.iter())
            .filter_map(|(rect, color)| color.map(|c| (*rect, c)))
    }

    pub fn all_with_default(&self, default: Color) -> impl Iterator<Item = (BBox, Color)> + '_ {
        self.rects
            .iter()
            .zip(self.colors.iter())
            .map(move |(rect, color)| (*rect, color.unwrap_or(default)))
    }

    /// Union of all rectangles as pairwise-disjoint contours.
    pub fn union(&self) -> Vec<Contour> {
        let mut pieces: Vec<BBox> = Vec::new();
        for rect in &self.rects {
            let mut fresh = vec![*rect];
            for prior in &pieces {
                fresh = fresh.iter().flat_map(|b| b.subtract(prior)).collect();
                if fresh.is_empty() {
                    break;
                }
            }
            pieces.extend(fresh);
        }
        pieces.iter().map(BBox::to_contour).collect()
    }

    pub fn classify(&self, shape: &BBox) -> Coverage {
        if shape.is_empty() || !self.extent.overlaps(shape) {
            return Coverage::None;
        }
        let mut touched = false;
        for rect in &self.rects {
            if rect.contains(shape) {
                return Coverage::Full;
            }
            touched |= rect.overlaps(shape);
        }
        if !touched {
            return Coverage::None;
        }
        // Covered jointly by several rectangles.
        let mut remaining = vec![*shape];
        for rect in &self.rects {
            remaining = remaining.iter().flat_map(|b| b.subtract(rect)).collect();
            if remaining.is_empty() {
                return Coverage::Full;
            }
        }
        Coverage::Partial
    }

    /// Exact positive-area test for a device-space polygon.
    pub fn overlaps_contour(&self, contour: &[crate::geometry::Point]) -> bool {
        let bbox = BBox::of_points(contour);
        if !self.extent.overlaps(&bbox) {
            return false;
        }
        self.rects
            .iter()
            .any(|rect| contour_overlaps_box(contour, rect))
    }
}
