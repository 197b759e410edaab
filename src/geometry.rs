use tiny_skia::Transform;

// Below this extent a clipped contour is treated as a sliver and discarded.
pub(crate) const EPSILON: f64 = 1e-3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub fn identity() -> Self {
        Self::from_operands(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    pub fn from_operands(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::from_operands(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::from_operands(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// `self` applied first, then `rhs` (row-vector convention used by PDF).
    pub fn concat(self, rhs: Self) -> Self {
        Self {
            a: self.a * rhs.a + self.b * rhs.c,
            b: self.a * rhs.b + self.b * rhs.d,
            c: self.c * rhs.a + self.d * rhs.c,
            d: self.c * rhs.b + self.d * rhs.d,
            e: self.e * rhs.a + self.f * rhs.c + rhs.e,
            f: self.e * rhs.b + self.f * rhs.d + rhs.f,
        }
    }

    pub fn transform_point(self, x: f64, y: f64) -> Point {
        Point {
            x: self.a * x + self.c * y + self.e,
            y: self.b * x + self.d * y + self.f,
        }
    }

    pub fn determinant(self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn inverse(self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        let e = -(self.e * a + self.f * c);
        let f = -(self.e * b + self.f * d);
        Some(Self { a, b, c, d, e, f })
    }

    pub fn is_identity(self) -> bool {
        let id = Self::identity();
        (self.a - id.a).abs() < EPSILON
            && self.b.abs() < EPSILON
            && self.c.abs() < EPSILON
            && (self.d - id.d).abs() < EPSILON
            && self.e.abs() < EPSILON
            && self.f.abs() < EPSILON
    }

    pub fn to_skia(self) -> Transform {
        Transform::from_row(
            self.a as f32,
            self.b as f32,
            self.c as f32,
            self.d as f32,
            self.e as f32,
            self.f as f32,
        )
    }

    /// Device-space image of the unit square `[0,1]x[0,1]`.
    pub fn unit_square(self) -> Contour {
        vec![
            self.transform_point(0.0, 0.0),
            self.transform_point(1.0, 0.0),
            self.transform_point(1.0, 1.0),
            self.transform_point(0.0, 1.0),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

pub(crate) type Contour = Vec<Point>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FillRule {
    NonZero,
    EvenOdd,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn empty() -> Self {
        Self {
            x0: f64::INFINITY,
            y0: f64::INFINITY,
            x1: f64::NEG_INFINITY,
            y1: f64::NEG_INFINITY,
        }
    }

    pub fn of_points<'a>(points: impl IntoIterator<Item = &'a Point>) -> Self {
        let mut out = Self::empty();
        for p in points {
            out.include(*p);
        }
        out
    }

    pub fn include(&mut self, p: Point) {
        self.x0 = self.x0.min(p.x);
        self.y0 = self.y0.min(p.y);
        self.x1 = self.x1.max(p.x);
        self.y1 = self.y1.max(p.y);
    }

    pub fn is_empty(&self) -> bool {
        !(self.x0 <= self.x1 && self.y0 <= self.y1)
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn intersect(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }

    /// True when the two boxes share an area, not just an edge.
    pub fn overlaps(&self, other: &BBox) -> bool {
        let i = self.intersect(other);
        i.x1 - i.x0 > EPSILON && i.y1 - i.y0 > EPSILON
    }

    pub fn contains(&self, other: &BBox) -> bool {
        other.x0 >= self.x0 - EPSILON
            && other.y0 >= self.y0 - EPSILON
            && other.x1 <= self.x1 + EPSILON
            && other.y1 <= self.y1 + EPSILON
    }

    pub fn expand(&self, amount: f64) -> BBox {
        BBox {
            x0: self.x0 - amount,
            y0: self.y0 - amount,
            x1: self.x1 + amount,
            y1: self.y1 + amount,
        }
    }

    pub fn to_contour(&self) -> Contour {
        vec![
            Point::new(self.x0, self.y0),
            Point::new(self.x1, self.y0),
            Point::new(self.x1, self.y1),
            Point::new(self.x0, self.y1),
        ]
    }

    /// `self - other` as at most four disjoint boxes.
    pub fn subtract(&self, other: &BBox) -> Vec<BBox> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut out = Vec::with_capacity(4);
        if other.x0 > self.x0 {
            out.push(BBox::new(self.x0, self.y0, other.x0, self.y1));
        }
        if other.x1 < self.x1 {
            out.push(BBox::new(other.x1, self.y0, self.x1, self.y1));
        }
        let mid_x0 = self.x0.max(other.x0);
        let mid_x1 = self.x1.min(other.x1);
        if other.y0 > self.y0 {
            out.push(BBox::new(mid_x0, self.y0, mid_x1, other.y0));
        }
        if other.y1 < self.y1 {
            out.push(BBox::new(mid_x0, other.y1, mid_x1, self.y1));
        }
        out.retain(|b| b.width() > EPSILON && b.height() > EPSILON);
        out
    }
}

/// Half-plane `nx * x + ny * y <= c`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HalfPlane {
    nx: f64,
    ny: f64,
    c: f64,
}

impl HalfPlane {
    pub fn left_of(x: f64) -> Self {
        Self { nx: 1.0, ny: 0.0, c: x }
    }

    pub fn right_of(x: f64) -> Self {
        Self { nx: -1.0, ny: 0.0, c: -x }
    }

    pub fn below(y: f64) -> Self {
        Self { nx: 0.0, ny: 1.0, c: y }
    }

    pub fn above(y: f64) -> Self {
        Self { nx: 0.0, ny: -1.0, c: -y }
    }

    fn distance(&self, p: Point) -> f64 {
        self.nx * p.x + self.ny * p.y - self.c
    }
}

fn clip_half_plane(contour: &[Point], plane: HalfPlane) -> Contour {
    let mut out = Vec::with_capacity(contour.len() + 4);
    let Some(&last) = contour.last() else {
        return out;
    };
    let mut prev = last;
    let mut prev_d = plane.distance(prev);
    for &cur in contour {
        let cur_d = plane.distance(cur);
        let cur_in = cur_d <= 0.0;
        let prev_in = prev_d <= 0.0;
        if cur_in != prev_in {
            let t = prev_d / (prev_d - cur_d);
            out.push(Point::new(
                prev.x + (cur.x - prev.x) * t,
                prev.y + (cur.y - prev.y) * t,
            ));
        }
        if cur_in {
            out.push(cur);
        }
        prev = cur;
        prev_d = cur_d;
    }
    out
}

/// Clips one closed contour against the intersection of half-planes.
///
/// The subject may be non-convex and self-intersecting: winding numbers of
/// points strictly inside the clip region are preserved, so refilling the
/// result with the original fill rule reproduces the original coverage there.
pub(crate) fn clip_convex(contour: &[Point], planes: &[HalfPlane]) -> Contour {
    let mut current: Contour = contour.to_vec();
    for plane in planes {
        if current.len() < 3 {
            current.clear();
            break;
        }
        current = clip_half_plane(&current, *plane);
    }
    current
}

pub(crate) fn clip_to_box(contour: &[Point], bbox: &BBox) -> Contour {
    clip_convex(
        contour,
        &[
            HalfPlane::right_of(bbox.x0),
            HalfPlane::left_of(bbox.x1),
            HalfPlane::above(bbox.y0),
            HalfPlane::below(bbox.y1),
        ],
    )
}

pub(crate) fn is_degenerate(contour: &[Point]) -> bool {
    if contour.len() < 3 {
        return true;
    }
    let bbox = BBox::of_points(contour);
    bbox.width() <= EPSILON || bbox.height() <= EPSILON
}

pub(crate) fn signed_area(contour: &[Point]) -> f64 {
    let n = contour.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let p = contour[i];
        let q = contour[(i + 1) % n];
        sum += p.x * q.y - q.x * p.y;
    }
    sum * 0.5
}

/// True when the contour and the box share a region of positive area.
pub(crate) fn contour_overlaps_box(contour: &[Point], bbox: &BBox) -> bool {
    if !BBox::of_points(contour).overlaps(bbox) {
        return false;
    }
    !is_degenerate(&clip_to_box(contour, bbox))
}

/// Removes `bbox` from a contour set while keeping the fill rule meaningful.
///
/// The complement of the box is split into four disjoint convex strips; each
/// contour is clipped into each strip. Winding numbers are preserved inside
/// every strip and are zero outside it, so the union renders exactly like the
/// original everywhere except inside `bbox`, under either fill rule.
pub(crate) fn subtract_box(contours: &[Contour], bbox: &BBox) -> Vec<Contour> {
    let strips: [Vec<HalfPlane>; 4] = [
        vec![HalfPlane::left_of(bbox.x0)],
        vec![HalfPlane::right_of(bbox.x1)],
        vec![
            HalfPlane::right_of(bbox.x0),
            HalfPlane::left_of(bbox.x1),
            HalfPlane::below(bbox.y0),
        ],
        vec![
            HalfPlane::right_of(bbox.x0),
            HalfPlane::left_of(bbox.x1),
            HalfPlane::above(bbox.y1),
        ],
    ];
    let mut out = Vec::with_capacity(contours.len());
    for contour in contours {
        if contour.len() < 3 {
            continue;
        }
        if !BBox::of_points(contour).overlaps(bbox) {
            out.push(contour.clone());
            continue;
        }
        for strip in &strips {
            let piece = clip_convex(contour, strip);
            if !is_degenerate(&piece) {
                out.push(piece);
            }
        }
    }
    out
}

pub(crate) fn subtract_boxes(contours: &[Contour], boxes: &[BBox]) -> Vec<Contour> {
    let mut current = contours.to_vec();
    for bbox in boxes {
        current = subtract_box(&current, bbox);
        if current.is_empty() {
            break;
        }
    }
    current
}

/// Appends a flattened cubic Bézier (control points already in device space).
pub(crate) fn flatten_cubic(
    out: &mut Contour,
    p0: Point,
    p1: Point,
    p2: Point,
    p3: Point,
    tolerance: f64,
) {
    let ddx = (p0.x - 2.0 * p1.x + p2.x).abs().max((p1.x - 2.0 * p2.x + p3.x).abs());
    let ddy = (p0.y - 2.0 * p1.y + p2.y).abs().max((p1.y - 2.0 * p2.y + p3.y).abs());
    let dd = (ddx * ddx + ddy * ddy).sqrt();
    let steps = ((0.75 * dd / tolerance.max(EPSILON)).sqrt().ceil() as usize).clamp(1, 256);
    for i in 1..=steps {
        let t = i as f64 / steps as f64;
        let mt = 1.0 - t;
        let a = mt * mt * mt;
        let b = 3.0 * mt * mt * t;
        let c = 3.0 * mt * t * t;
        let d = t * t * t;
        out.push(Point::new(
            a * p0.x + b * p1.x + c * p2.x + d * p3.x,
            a * p0.y + b * p1.y + c * p2.y + d * p3.y,
        ));
    }
}

pub(crate) fn flatten_quad(out: &mut Contour, p0: Point, p1: Point, p2: Point, tolerance: f64) {
    let c1 = Point::new(p0.x + 2.0 / 3.0 * (p1.x - p0.x), p0.y + 2.0 / 3.0 * (p1.y - p0.y));
    let c2 = Point::new(p2.x + 2.0 / 3.0 * (p1.x - p2.x), p2.y + 2.0 / 3.0 * (p1.y - p2.y));
    flatten_cubic(out, p0, c1, c2, p2, tolerance);
}

/// Flattens a tiny-skia path (already in device space) into closed contours.
pub(crate) fn skia_path_contours(path: &tiny_skia::Path, tolerance: f64) -> Vec<Contour> {
    use tiny_skia::PathSegment;

    let mut out = Vec::new();
    let mut current: Contour = Vec::new();
    let to_point = |p: tiny_skia::Point| Point::new(p.x as f64, p.y as f64);
    for segment in path.segments() {
        match segment {
            PathSegment::MoveTo(p) => {
                if current.len() >= 3 {
                    out.push(std::mem::take(&mut current));
                }
                current.clear();
                current.push(to_point(p));
            }
            PathSegment::LineTo(p) => current.push(to_point(p)),
            PathSegment::QuadTo(p1, p2) => {
                let Some(&start) = current.last() else {
                    continue;
                };
                flatten_quad(&mut current, start, to_point(p1), to_point(p2), tolerance);
            }
            PathSegment::CubicTo(p1, p2, p3) => {
                let Some(&start) = current.last() else {
                    continue;
                };
                flatten_cubic(
                    &mut current,
                    start,
                    to_point(p1),
                    to_point(p2),
                    to_point(p3),
                    tolerance,
                );
            }
            PathSegment::Close => {
                if current.len() >= 3 {
                    out.push(std::mem::take(&mut current));
                }
                current.clear();
            }
        }
    }
    if current.len() >= 3 {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Contour {
        BBox::new(x0, y0, x1, y1).to_contour()
    }

    fn total_abs_area(contours: &[Contour]) -> f64 {
        contours.iter().map(|c| signed_area(c).abs()).sum()
    }

    #[test]
    fn matrix_concat_applies_left_operand_first() {
        let scale = Matrix::scale(2.0, 2.0);
        let shift = Matrix::translation(10.0, 0.0);
        let p = scale.concat(shift).transform_point(1.0, 1.0);
        assert_eq!(p, Point::new(12.0, 2.0));
        let q = shift.concat(scale).transform_point(1.0, 1.0);
        assert_eq!(q, Point::new(22.0, 2.0));
    }

    #[test]
    fn matrix_inverse_round_trips_points() {
        let m = Matrix::from_operands(0.0, 2.0, -3.0, 0.0, 40.0, 5.0);
        let inv = m.inverse().expect("invertible");
        let p = m.transform_point(3.0, 7.0);
        let back = inv.transform_point(p.x, p.y);
        assert!((back.x - 3.0).abs() < 1e-9 && (back.y - 7.0).abs() < 1e-9);
        assert!(Matrix::scale(0.0, 1.0).inverse().is_none());
    }

    #[test]
    fn bbox_subtract_yields_disjoint_remainder() {
        let outer = BBox::new(0.0, 0.0, 10.0, 10.0);
        let hole = BBox::new(2.0, 2.0, 5.0, 5.0);
        let parts = outer.subtract(&hole);
        let area: f64 = parts.iter().map(|b| b.width() * b.height()).sum();
        assert!((area - 91.0).abs() < 1e-9);
        for (i, a) in parts.iter().enumerate() {
            for b in parts.iter().skip(i + 1) {
                assert!(!a.overlaps(b));
            }
        }
    }

    #[test]
    fn subtract_box_removes_exactly_the_hole_area() {
        let subject = vec![square(0.0, 0.0, 100.0, 100.0)];
        let out = subtract_box(&subject, &BBox::new(25.0, 25.0, 75.0, 75.0));
        assert!((total_abs_area(&out) - 7500.0).abs() < 1e-6);
        for contour in &out {
            assert!(!contour_overlaps_box(contour, &BBox::new(25.0, 25.0, 75.0, 75.0)));
        }
    }

    #[test]
    fn subtract_box_keeps_far_contours_verbatim() {
        let far = square(200.0, 200.0, 210.0, 210.0);
        let out = subtract_box(&[far.clone()], &BBox::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(out, vec![far]);
    }

    #[test]
    fn subtract_box_fully_covered_contour_vanishes() {
        let out = subtract_box(
            &[square(10.0, 10.0, 20.0, 20.0)],
            &BBox::new(0.0, 0.0, 50.0, 50.0),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn clipping_preserves_winding_of_concave_subject() {
        // U shape; the notch must stay empty after clipping into a strip.
        let u = vec![
            Point::new(0.0, 0.0),
            Point::new(30.0, 0.0),
            Point::new(30.0, 30.0),
            Point::new(20.0, 30.0),
            Point::new(20.0, 10.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 30.0),
            Point::new(0.0, 30.0),
        ];
        let piece = clip_convex(&u, &[HalfPlane::above(20.0)]);
        assert!((signed_area(&piece).abs() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn flatten_cubic_ends_on_endpoint() {
        let mut out = vec![Point::new(0.0, 0.0)];
        flatten_cubic(
            &mut out,
            Point::new(0.0, 0.0),
            Point::new(0.0, 50.0),
            Point::new(50.0, 50.0),
            Point::new(50.0, 0.0),
            0.05,
        );
        assert!(out.len() > 8);
        assert_eq!(*out.last().expect("points"), Point::new(50.0, 0.0));
    }
}
