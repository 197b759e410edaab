use lopdf::content::Operation;
use tiny_skia::{LineCap, LineJoin, PathBuilder, PathStroker, Stroke, StrokeDash};

use crate::geometry::{
    BBox, Contour, FillRule, Matrix, Point, flatten_cubic, skia_path_contours, subtract_boxes,
};
use crate::ops::{Paint, op_f64_n};
use crate::region::{Coverage, RegionIndex};
use crate::state::GraphicsState;

// Hairlines (`0 w`) are painted one device pixel wide.
const HAIRLINE_WIDTH: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Segment {
    MoveTo(Point),
    LineTo(Point),
    CurveTo(Point, Point, Point),
    Close,
}

/// Path construction operators seen since the last painting operator.
#[derive(Clone, Debug, Default)]
pub(crate) struct PendingPath {
    pub ops: Vec<Operation>,
    pub segments: Vec<Segment>,
    pub clip: Option<FillRule>,
    current: Option<Point>,
    start: Option<Point>,
}

impl PendingPath {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.clip.is_none()
    }

    pub fn take(&mut self) -> PendingPath {
        std::mem::take(self)
    }

    pub fn push(&mut self, op: &Operation) {
        self.ops.push(op.clone());
        match op.operator.as_str() {
            "m" => {
                if let Some([x, y]) = op_f64_n::<2>(op) {
                    self.move_to(Point::new(x, y));
                }
            }
            "l" => {
                if let Some([x, y]) = op_f64_n::<2>(op) {
                    self.line_to(Point::new(x, y));
                }
            }
            "c" => {
                if let Some([x1, y1, x2, y2, x3, y3]) = op_f64_n::<6>(op) {
                    self.curve_to(Point::new(x1, y1), Point::new(x2, y2), Point::new(x3, y3));
                }
            }
            "v" => {
                if let (Some([x2, y2, x3, y3]), Some(cur)) = (op_f64_n::<4>(op), self.current) {
                    self.curve_to(cur, Point::new(x2, y2), Point::new(x3, y3));
                }
            }
            "y" => {
                if let Some([x1, y1, x3, y3]) = op_f64_n::<4>(op) {
                    let end = Point::new(x3, y3);
                    self.curve_to(Point::new(x1, y1), end, end);
                }
            }
            "h" => self.close(),
            "re" => {
                if let Some([x, y, w, h]) = op_f64_n::<4>(op) {
                    self.move_to(Point::new(x, y));
                    self.line_to(Point::new(x + w, y));
                    self.line_to(Point::new(x + w, y + h));
                    self.line_to(Point::new(x, y + h));
                    self.close();
                }
            }
            _ => {}
        }
    }

    fn move_to(&mut self, p: Point) {
        self.segments.push(Segment::MoveTo(p));
        self.current = Some(p);
        self.start = Some(p);
    }

    fn line_to(&mut self, p: Point) {
        if self.current.is_none() {
            return;
        }
        self.segments.push(Segment::LineTo(p));
        self.current = Some(p);
    }

    fn curve_to(&mut self, c1: Point, c2: Point, p: Point) {
        if self.current.is_none() {
            return;
        }
        self.segments.push(Segment::CurveTo(c1, c2, p));
        self.current = Some(p);
    }

    fn close(&mut self) {
        if self.current.is_none() {
            return;
        }
        self.segments.push(Segment::Close);
        self.current = self.start;
    }

    pub fn close_for_paint(&mut self) {
        if !matches!(self.segments.last(), Some(Segment::Close)) {
            self.close();
        }
    }
}

/// Flattens subpaths into closed device-space contours.
pub(crate) fn fill_contours(segments: &[Segment], ctm: Matrix, tolerance: f64) -> Vec<Contour> {
    let mut out = Vec::new();
    let mut current: Contour = Vec::new();
    let mut start: Option<Point> = None;
    let to_device = |p: Point| ctm.transform_point(p.x, p.y);
    for segment in segments {
        match *segment {
            Segment::MoveTo(p) => {
                if current.len() >= 3 {
                    out.push(std::mem::take(&mut current));
                }
                current.clear();
                current.push(to_device(p));
                start = Some(p);
            }
            Segment::LineTo(p) => current.push(to_device(p)),
            Segment::CurveTo(c1, c2, p) => {
                let Some(&from) = current.last() else {
                    continue;
                };
                flatten_cubic(
                    &mut current,
                    from,
                    to_device(c1),
                    to_device(c2),
                    to_device(p),
                    tolerance,
                );
            }
            Segment::Close => {
                if current.len() >= 3 {
                    out.push(std::mem::take(&mut current));
                }
                current.clear();
                // A subpath continuing after `h` restarts at the closed start.
                if let Some(s) = start {
                    current.push(to_device(s));
                }
            }
        }
    }
    if current.len() >= 3 {
        out.push(current);
    }
    out
}

fn device_bounds(segments: &[Segment], ctm: Matrix) -> BBox {
    let mut bbox = BBox::empty();
    let mut include = |p: &Point| bbox.include(ctm.transform_point(p.x, p.y));
    for segment in segments {
        match segment {
            Segment::MoveTo(p) | Segment::LineTo(p) => include(p),
            Segment::CurveTo(a, b, c) => {
                include(a);
                include(b);
                include(c);
            }
            Segment::Close => {}
        }
    }
    bbox
}

// Upper bound on how far a stroke reaches from its centerline, in device space.
fn stroke_reach(state: &GraphicsState) -> f64 {
    if state.line_width <= 0.0 {
        return HAIRLINE_WIDTH;
    }
    let m = state.ctm;
    let frobenius = (m.a * m.a + m.b * m.b + m.c * m.c + m.d * m.d).sqrt();
    let join_factor = if state.line_join == 0 {
        state.miter_limit.max(1.5)
    } else {
        1.5
    };
    state.line_width * 0.5 * frobenius * join_factor
}

fn skia_path(segments: &[Segment], transform: Option<Matrix>) -> Option<tiny_skia::Path> {
    let map = |p: &Point| match transform {
        Some(m) => m.transform_point(p.x, p.y),
        None => *p,
    };
    let mut pb = PathBuilder::new();
    for segment in segments {
        match segment {
            Segment::MoveTo(p) => {
                let p = map(p);
                pb.move_to(p.x as f32, p.y as f32);
            }
            Segment::LineTo(p) => {
                let p = map(p);
                pb.line_to(p.x as f32, p.y as f32);
            }
            Segment::CurveTo(a, b, c) => {
                let (a, b, c) = (map(a), map(b), map(c));
                pb.cubic_to(
                    a.x as f32, a.y as f32, b.x as f32, b.y as f32, c.x as f32, c.y as f32,
                );
            }
            Segment::Close => pb.close(),
        }
    }
    pb.finish()
}

/// Device-space outline of the stroked path, or `None` when it cannot be
/// computed.
pub(crate) fn stroke_contours(
    segments: &[Segment],
    state: &GraphicsState,
    tolerance: f64,
) -> Option<Vec<Contour>> {
    let hairline = state.line_width <= 0.0;
    let line_cap = match state.line_cap {
        1 => LineCap::Round,
        2 => LineCap::Square,
        _ => LineCap::Butt,
    };
    let line_join = match state.line_join {
        1 => LineJoin::Round,
        2 => LineJoin::Bevel,
        _ => LineJoin::Miter,
    };
    let dash = state.dash.as_ref().and_then(|(pattern, phase)| {
        let mut array: Vec<f32> = pattern.iter().map(|v| v.abs() as f32).collect();
        if array.len() % 2 == 1 {
            array.extend_from_within(..);
        }
        StrokeDash::new(array, *phase as f32)
    });
    let mut stroke = Stroke {
        width: if hairline {
            HAIRLINE_WIDTH as f32
        } else {
            state.line_width as f32
        },
        miter_limit: state.miter_limit.max(1.0) as f32,
        line_cap,
        line_join,
        dash,
    };

    let outline = if hairline {
        // Hairline width is in device space; stroke after transforming.
        stroke.dash = None;
        let path = skia_path(segments, Some(state.ctm))?;
        path.stroke(&stroke, 1.0)?
    } else {
        let path = skia_path(segments, None)?;
        let ts = state.ctm.to_skia();
        let res_scale = PathStroker::compute_resolution_scale(&ts);
        path.stroke(&stroke, res_scale)?.transform(ts)?
    };
    Some(skia_path_contours(&outline, tolerance))
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PartOutcome {
    Keep,
    /// Remaining geometry as device-space contours; empty means removed.
    Clipped(Vec<Contour>),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PathOutcome {
    Unchanged,
    Rewritten {
        fill: Option<PartOutcome>,
        stroke: Option<PartOutcome>,
    },
}

fn clip_part(contours: Vec<Contour>, regions: &RegionIndex) -> PartOutcome {
    let footprint = BBox::of_points(contours.iter().flatten());
    match regions.classify(&footprint) {
        Coverage::None => PartOutcome::Keep,
        Coverage::Full => PartOutcome::Clipped(Vec::new()),
        Coverage::Partial => {
            if !contours.iter().any(|c| regions.overlaps_contour(c)) {
                return PartOutcome::Keep;
            }
            PartOutcome::Clipped(subtract_boxes(&contours, regions.rects()))
        }
    }
}

/// Removes the region union from a painted path.
pub(crate) fn clip_painted_path(
    path: &PendingPath,
    paint: Paint,
    state: &GraphicsState,
    regions: &RegionIndex,
    tolerance: f64,
) -> PathOutcome {
    let bounds = device_bounds(&path.segments, state.ctm);
    if bounds.is_empty() {
        return PathOutcome::Unchanged;
    }

    let fill = paint.fill.map(|_| {
        if regions.classify(&bounds) == Coverage::None {
            return PartOutcome::Keep;
        }
        clip_part(fill_contours(&path.segments, state.ctm, tolerance), regions)
    });

    let stroke = paint.stroke.then(|| {
        let reach = bounds.expand(stroke_reach(state));
        match regions.classify(&reach) {
            Coverage::None => PartOutcome::Keep,
            Coverage::Full => PartOutcome::Clipped(Vec::new()),
            Coverage::Partial => match stroke_contours(&path.segments, state, tolerance) {
                Some(outline) if !outline.is_empty() => clip_part(outline, regions),
                // Outline unavailable: remove the stroke outright.
                _ => PartOutcome::Clipped(Vec::new()),
            },
        }
    });

    let untouched = |part: &Option<PartOutcome>| matches!(part, None | Some(PartOutcome::Keep));
    if untouched(&fill) && untouched(&stroke) {
        PathOutcome::Unchanged
    } else {
        PathOutcome::Rewritten { fill, stroke }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::signed_area;
    use crate::types::{Rect, RedactionLocation};
    use lopdf::Object as LoObject;

    fn regions(x: f32, y: f32, w: f32, h: f32) -> RegionIndex {
        RegionIndex::new(&[RedactionLocation::new(0, Rect::new(x, y, w, h))])
    }

    fn path(ops: &[(&str, &[f64])]) -> PendingPath {
        let mut out = PendingPath::default();
        for (name, args) in ops {
            let operands = args.iter().map(|v| LoObject::Real(*v as f32)).collect();
            out.push(&Operation::new(name, operands));
        }
        out
    }

    const FILL: Paint = Paint {
        fill: Some(FillRule::NonZero),
        stroke: false,
        close: false,
    };
    const STROKE: Paint = Paint {
        fill: None,
        stroke: true,
        close: false,
    };

    fn area(contours: &[Contour]) -> f64 {
        contours.iter().map(|c| signed_area(c).abs()).sum()
    }

    #[test]
    fn rect_fill_outside_region_is_unchanged() {
        let p = path(&[("re", &[0.0, 0.0, 10.0, 10.0])]);
        let state = GraphicsState::new(Matrix::identity());
        let out = clip_painted_path(&p, FILL, &state, &regions(50.0, 50.0, 10.0, 10.0), 0.05);
        assert_eq!(out, PathOutcome::Unchanged);
    }

    #[test]
    fn rect_fill_inside_region_is_removed() {
        let p = path(&[("re", &[55.0, 55.0, 2.0, 2.0])]);
        let state = GraphicsState::new(Matrix::identity());
        let out = clip_painted_path(&p, FILL, &state, &regions(50.0, 50.0, 10.0, 10.0), 0.05);
        assert_eq!(
            out,
            PathOutcome::Rewritten {
                fill: Some(PartOutcome::Clipped(Vec::new())),
                stroke: None
            }
        );
    }

    #[test]
    fn partial_fill_loses_exactly_the_covered_area() {
        let p = path(&[("re", &[0.0, 0.0, 100.0, 100.0])]);
        let state = GraphicsState::new(Matrix::identity());
        let out = clip_painted_path(&p, FILL, &state, &regions(50.0, 0.0, 100.0, 100.0), 0.05);
        let PathOutcome::Rewritten {
            fill: Some(PartOutcome::Clipped(contours)),
            ..
        } = out
        else {
            panic!("expected clipped fill");
        };
        assert!((area(&contours) - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn ctm_is_applied_before_classification() {
        let p = path(&[("re", &[0.0, 0.0, 10.0, 10.0])]);
        let state = GraphicsState::new(Matrix::translation(50.0, 50.0));
        let out = clip_painted_path(&p, FILL, &state, &regions(40.0, 40.0, 30.0, 30.0), 0.05);
        assert!(matches!(
            out,
            PathOutcome::Rewritten {
                fill: Some(PartOutcome::Clipped(ref c)),
                ..
            } if c.is_empty()
        ));
    }

    #[test]
    fn stroke_near_region_is_clipped_by_outline() {
        // Centerline stays outside; the 10pt wide stroke reaches in.
        let p = path(&[("m", &[0.0, 48.0]), ("l", &[100.0, 48.0])]);
        let mut state = GraphicsState::new(Matrix::identity());
        state.line_width = 10.0;
        let out = clip_painted_path(&p, STROKE, &state, &regions(0.0, 50.0, 100.0, 50.0), 0.05);
        let PathOutcome::Rewritten {
            stroke: Some(PartOutcome::Clipped(contours)),
            ..
        } = out
        else {
            panic!("expected clipped stroke");
        };
        // 100 x 10 outline, 100 x 3 of it inside the region.
        assert!((area(&contours) - 700.0).abs() < 0.5);
    }

    #[test]
    fn evenodd_hole_survives_subtraction() {
        let p = path(&[
            ("re", &[0.0, 0.0, 100.0, 100.0]),
            ("re", &[40.0, 40.0, 20.0, 20.0]),
        ]);
        let state = GraphicsState::new(Matrix::identity());
        let paint = Paint {
            fill: Some(FillRule::EvenOdd),
            stroke: false,
            close: false,
        };
        let out = clip_painted_path(&p, paint, &state, &regions(90.0, 0.0, 10.0, 100.0), 0.05);
        let PathOutcome::Rewritten {
            fill: Some(PartOutcome::Clipped(contours)),
            ..
        } = out
        else {
            panic!("expected clipped fill");
        };
        // The inner square is far from the region and is kept verbatim.
        assert!(contours.iter().any(|c| (signed_area(c).abs() - 400.0).abs() < 1e-9));
        assert!((area(&contours) - 9000.0 - 400.0).abs() < 1e-6);
    }

    #[test]
    fn curves_are_flattened_in_device_space() {
        let p = path(&[
            ("m", &[0.0, 0.0]),
            ("c", &[0.0, 50.0, 50.0, 50.0, 50.0, 0.0]),
            ("h", &[]),
        ]);
        let contours = fill_contours(&p.segments, Matrix::identity(), 0.05);
        assert_eq!(contours.len(), 1);
        assert!(contours[0].len() > 10);
    }
}
