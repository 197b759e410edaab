use fixed::types::I32F32;

use crate::geometry::BBox;

/// Page-space length held at milli-point precision, so rectangles read
/// back exactly what the caller passed in.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Pt(I32F32);

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::from_bits(0));

    /// Whether `value` is finite and fits the fixed-point range.
    pub fn represents(value: f32) -> bool {
        value.is_finite() && (value as f64).abs() < i32::MAX as f64
    }

    pub fn from_f32(value: f32) -> Pt {
        if !value.is_finite() {
            return Pt::ZERO;
        }
        let milli = (value as f64 * 1000.0).round();
        let milli = milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        Pt::from_milli_i64(milli)
    }

    pub fn from_i32(value: i32) -> Pt {
        Pt::from_milli_i64((value as i64) * 1000)
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn to_milli_i64(self) -> i64 {
        let bits = self.0.to_bits() as i128;
        let denom = 1i128 << 32;
        let scaled = bits * 1000;
        let adj = if scaled >= 0 { denom / 2 } else { -denom / 2 };
        let milli = (scaled + adj) / denom;
        milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn from_milli_i64(milli: i64) -> Pt {
        Pt::from_milli_i128(milli as i128)
    }

    fn from_milli_i128(milli: i128) -> Pt {
        let denom = 1i128 << 32;
        let adj = if milli >= 0 { 500 } else { -500 };
        let bits = (milli * denom + adj) / 1000;
        let bits = bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Pt(I32F32::from_bits(bits))
    }
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt::from_milli_i128(self.to_milli_i64() as i128 + rhs.to_milli_i64() as i128)
    }
}

impl std::ops::Sub for Pt {
    type Output = Pt;
    fn sub(self, rhs: Pt) -> Pt {
        Pt::from_milli_i128(self.to_milli_i64() as i128 - rhs.to_milli_i64() as i128)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
    /// Every component was finite and in range when the rect was built.
    representable: bool,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x: Pt::from_f32(x),
            y: Pt::from_f32(y),
            width: Pt::from_f32(width),
            height: Pt::from_f32(height),
            representable: [x, y, width, height].into_iter().all(Pt::represents),
        }
    }

    /// False when a component was NaN, infinite or too large; such a rect
    /// no longer describes the area the caller asked for.
    pub fn is_representable(self) -> bool {
        self.representable
    }

    /// Corner-normalized bounds; negative width or height flips the origin.
    pub(crate) fn to_bbox(self) -> BBox {
        let x0 = self.x.to_f32() as f64;
        let y0 = self.y.to_f32() as f64;
        BBox::new(
            x0,
            y0,
            x0 + self.width.to_f32() as f64,
            y0 + self.height.to_f32() as f64,
        )
    }

    pub fn is_empty(self) -> bool {
        self.width == Pt::ZERO || self.height == Pt::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self {
            r: r.clamp(0.0, 1.0),
            g: g.clamp(0.0, 1.0),
            b: b.clamp(0.0, 1.0),
        }
    }

    pub fn is_valid(self) -> bool {
        [self.r, self.g, self.b]
            .iter()
            .all(|c| c.is_finite() && (0.0..=1.0).contains(c))
    }
}

/// One rectangle to remove, addressed by zero-based page index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedactionLocation {
    pub page_index: usize,
    pub rect: Rect,
    /// Paint this color over the rectangle after its content is removed.
    pub color: Option<Color>,
}

impl RedactionLocation {
    pub fn new(page_index: usize, rect: Rect) -> Self {
        Self {
            page_index,
            rect,
            color: None,
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }
}
