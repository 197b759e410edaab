use std::sync::Arc;

use lopdf::Object as LoObject;
use lopdf::content::Operation;

use crate::error::RedactError;
use crate::font::FontMetrics;
use crate::geometry::{Contour, FillRule, Matrix};
use crate::object::obj_to_f64;
use crate::ops::{OpKind, op_f64, op_f64_n, op_name};
use crate::resources::ResourceResolver;

/// A clip path in device space.
#[derive(Clone, Debug)]
pub(crate) struct ClipPath {
    pub contours: Vec<Contour>,
    pub rule: FillRule,
}

#[derive(Clone, Debug)]
pub(crate) struct TextState {
    pub font: Option<Arc<FontMetrics>>,
    pub font_size: f64,
    pub char_spacing: f64,
    pub word_spacing: f64,
    /// `Tz / 100`.
    pub h_scale: f64,
    pub leading: f64,
    pub rise: f64,
    pub render_mode: i64,
    pub matrix: Matrix,
    pub line_matrix: Matrix,
    /// Uncertainty of the text position along the baseline, as
    /// `(low, high)` offsets from `matrix`, in unscaled text space.
    pub slack: (f64, f64),
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            h_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: 0,
            matrix: Matrix::identity(),
            line_matrix: Matrix::identity(),
            slack: (0.0, 0.0),
        }
    }
}

/// A color as the operators that established it, replayable in either role.
#[derive(Clone, Debug, Default)]
pub(crate) struct ColorOps {
    pub space: Option<Operation>,
    pub value: Option<Operation>,
}

impl ColorOps {
    fn set(&mut self, op: &Operation) {
        match op.operator.as_str() {
            "cs" | "CS" => {
                self.space = Some(op.clone());
                self.value = None;
            }
            "sc" | "scn" | "SC" | "SCN" => self.value = Some(op.clone()),
            _ => {
                self.space = None;
                self.value = Some(op.clone());
            }
        }
    }

    /// Operators that set this color as the nonstroking color.
    pub fn as_fill(&self) -> Vec<Operation> {
        let convert = |op: &Operation| {
            let operator = match op.operator.as_str() {
                "CS" => "cs",
                "SC" => "sc",
                "SCN" => "scn",
                "G" => "g",
                "RG" => "rg",
                "K" => "k",
                other => other,
            };
            Operation::new(operator, op.operands.clone())
        };
        let mut out: Vec<Operation> = self.space.iter().chain(self.value.iter()).map(convert).collect();
        if out.is_empty() {
            out.push(Operation::new("g", vec![LoObject::Integer(0)]));
        }
        out
    }
}

#[derive(Clone, Debug)]
pub(crate) struct GraphicsState {
    pub ctm: Matrix,
    pub clip: Vec<Arc<ClipPath>>,
    pub fill_color: ColorOps,
    pub stroke_color: ColorOps,
    pub line_width: f64,
    pub line_cap: i64,
    pub line_join: i64,
    pub miter_limit: f64,
    pub dash: Option<(Vec<f64>, f64)>,
    pub text: TextState,
}

impl GraphicsState {
    pub fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            clip: Vec::new(),
            fill_color: ColorOps::default(),
            stroke_color: ColorOps::default(),
            line_width: 1.0,
            line_cap: 0,
            line_join: 0,
            miter_limit: 10.0,
            dash: None,
            text: TextState::default(),
        }
    }
}

/// Replays state operators with strict save/restore discipline.
#[derive(Debug)]
pub(crate) struct StateTracker {
    current: GraphicsState,
    stack: Vec<GraphicsState>,
    index: usize,
    /// A state operator ran outside every save group.
    base_touched: bool,
}

impl StateTracker {
    pub fn new(initial: GraphicsState) -> Self {
        Self {
            current: initial,
            stack: Vec::new(),
            index: 0,
            base_touched: false,
        }
    }

    pub fn current(&self) -> &GraphicsState {
        &self.current
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// State outside every open save group.
    pub fn base(&self) -> &GraphicsState {
        self.stack.first().unwrap_or(&self.current)
    }

    /// Whether the state outside every save group is still the one the
    /// tracker started with. Fills, alpha and blend settings made there would
    /// otherwise leak into anything appended after the stream.
    pub fn base_is_initial(&self) -> bool {
        !self.base_touched
    }

    pub fn save(&mut self) {
        self.stack.push(self.current.clone());
    }

    pub fn restore(&mut self) -> Result<(), RedactError> {
        let Some(mut previous) = self.stack.pop() else {
            return Err(RedactError::StateStack { index: self.index });
        };
        // The text matrices are not part of the saved state.
        previous.text.matrix = self.current.text.matrix;
        previous.text.line_matrix = self.current.text.line_matrix;
        previous.text.slack = self.current.text.slack;
        self.current = previous;
        Ok(())
    }

    pub fn push_clip(&mut self, clip: ClipPath) {
        self.current.clip.push(Arc::new(clip));
    }

    /// Advances the text matrix by a displacement in unscaled text space.
    pub fn advance_text(&mut self, tx: f64, slack: (f64, f64)) {
        let t = &mut self.current.text;
        t.matrix = Matrix::translation(tx, 0.0).concat(t.matrix);
        t.slack = slack;
    }

    /// Applies one state-changing operator. Operators with malformed
    /// operands are ignored, matching how viewers treat them.
    pub fn apply(
        &mut self,
        op: &Operation,
        kind: OpKind,
        resources: &dyn ResourceResolver,
    ) -> Result<(), RedactError> {
        self.index += 1;
        if self.stack.is_empty()
            && matches!(
                kind,
                OpKind::Transform
                    | OpKind::GraphicsState
                    | OpKind::Color
                    | OpKind::TextState
                    | OpKind::Clip(_)
            )
        {
            self.base_touched = true;
        }
        match kind {
            OpKind::SaveState => self.save(),
            OpKind::RestoreState => self.restore()?,
            OpKind::Transform => {
                if let Some([a, b, c, d, e, f]) = op_f64_n::<6>(op) {
                    self.current.ctm = Matrix::from_operands(a, b, c, d, e, f).concat(self.current.ctm);
                }
            }
            OpKind::Color => {
                if op.operator.chars().all(|c| c.is_ascii_lowercase()) {
                    self.current.fill_color.set(op);
                } else {
                    self.current.stroke_color.set(op);
                }
            }
            OpKind::GraphicsState => self.apply_graphics_state(op, resources),
            OpKind::TextState => self.apply_text_state(op, resources),
            OpKind::TextPosition => self.apply_text_position(op),
            OpKind::BeginText => {
                let t = &mut self.current.text;
                t.matrix = Matrix::identity();
                t.line_matrix = Matrix::identity();
                t.slack = (0.0, 0.0);
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_graphics_state(&mut self, op: &Operation, resources: &dyn ResourceResolver) {
        let s = &mut self.current;
        match op.operator.as_str() {
            "w" => {
                if let Some(w) = op_f64(op, 0) {
                    s.line_width = w.abs();
                }
            }
            "J" => {
                if let Some(v) = op_f64(op, 0) {
                    s.line_cap = v as i64;
                }
            }
            "j" => {
                if let Some(v) = op_f64(op, 0) {
                    s.line_join = v as i64;
                }
            }
            "M" => {
                if let Some(v) = op_f64(op, 0) {
                    s.miter_limit = v;
                }
            }
            "d" => {
                let pattern = op
                    .operands
                    .first()
                    .and_then(|o| o.as_array().ok())
                    .map(|arr| arr.iter().filter_map(obj_to_f64).collect::<Vec<_>>());
                if let (Some(pattern), Some(phase)) = (pattern, op_f64(op, 1)) {
                    s.dash = if pattern.is_empty() {
                        None
                    } else {
                        Some((pattern, phase))
                    };
                }
            }
            "gs" => {
                let Some(gs) = op_name(op, 0).and_then(|name| resources.ext_gstate(name)) else {
                    return;
                };
                if let Some(w) = gs.line_width {
                    s.line_width = w.abs();
                }
                if let Some(v) = gs.line_cap {
                    s.line_cap = v;
                }
                if let Some(v) = gs.line_join {
                    s.line_join = v;
                }
                if let Some(v) = gs.miter_limit {
                    s.miter_limit = v;
                }
                if let Some(dash) = &gs.dash {
                    s.dash = Some(dash.clone()).filter(|(p, _)| !p.is_empty());
                }
                if let Some((font, size)) = &gs.font {
                    s.text.font = Some(font.clone());
                    s.text.font_size = *size;
                }
            }
            _ => {}
        }
    }

    fn apply_text_state(&mut self, op: &Operation, resources: &dyn ResourceResolver) {
        let t = &mut self.current.text;
        match op.operator.as_str() {
            "Tc" => t.char_spacing = op_f64(op, 0).unwrap_or(t.char_spacing),
            "Tw" => t.word_spacing = op_f64(op, 0).unwrap_or(t.word_spacing),
            "Tz" => t.h_scale = op_f64(op, 0).map(|v| v / 100.0).unwrap_or(t.h_scale),
            "TL" => t.leading = op_f64(op, 0).unwrap_or(t.leading),
            "Ts" => t.rise = op_f64(op, 0).unwrap_or(t.rise),
            "Tr" => t.render_mode = op_f64(op, 0).map(|v| v as i64).unwrap_or(t.render_mode),
            "Tf" => {
                if let Some(size) = op_f64(op, 1) {
                    t.font_size = size;
                }
                if let Some(name) = op_name(op, 0) {
                    t.font = Some(
                        resources
                            .font(name)
                            .unwrap_or_else(|| Arc::new(FontMetrics::unknown(&String::from_utf8_lossy(name)))),
                    );
                }
            }
            _ => {}
        }
    }

    fn apply_text_position(&mut self, op: &Operation) {
        let t = &mut self.current.text;
        let next_line = |t: &mut TextState, tx: f64, ty: f64| {
            t.line_matrix = Matrix::translation(tx, ty).concat(t.line_matrix);
            t.matrix = t.line_matrix;
            t.slack = (0.0, 0.0);
        };
        match op.operator.as_str() {
            "Td" => {
                if let Some([tx, ty]) = op_f64_n::<2>(op) {
                    next_line(t, tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = op_f64_n::<2>(op) {
                    t.leading = -ty;
                    next_line(t, tx, ty);
                }
            }
            "T*" => {
                let leading = t.leading;
                next_line(t, 0.0, -leading);
            }
            "Tm" => {
                if let Some([a, b, c, d, e, f]) = op_f64_n::<6>(op) {
                    t.matrix = Matrix::from_operands(a, b, c, d, e, f);
                    t.line_matrix = t.matrix;
                    t.slack = (0.0, 0.0);
                }
            }
            _ => {}
        }
    }

    /// Applies the positioning side effects of `'` and `"` before their glyphs.
    pub fn apply_quote_prefix(&mut self, op: &Operation) {
        if op.operator == "\"" {
            if let Some(aw) = op_f64(op, 0) {
                self.current.text.word_spacing = aw;
            }
            if let Some(ac) = op_f64(op, 1) {
                self.current.text.char_spacing = ac;
            }
        }
        self.apply_text_position(&Operation::new("T*", vec![]));
    }
}
