use lopdf::Object as LoObject;
use lopdf::content::Operation;

use crate::geometry::{Contour, FillRule, Matrix};
use crate::ops::real;
use crate::types::Color;

#[derive(Debug, Clone, Copy)]
struct Group {
    start: usize,
    painted: bool,
    dropped: bool,
}

/// Output operator stream for one content stream.
///
/// Save/restore groups copied from the source are tracked so that a group
/// left with nothing but state changes after its marks were removed can be
/// elided on restore. Groups the rewriter opens itself go through
/// [`Canvas::scoped`], which always closes them.
#[derive(Debug, Default)]
pub(crate) struct Canvas {
    ops: Vec<Operation>,
    groups: Vec<Group>,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn op_mut(&mut self, index: usize) -> Option<&mut Operation> {
        self.ops.get_mut(index)
    }

    /// Copies a state or path-construction operator.
    pub fn push(&mut self, op: Operation) {
        self.ops.push(op);
    }

    /// Copies an operator that marks the page.
    pub fn paint(&mut self, op: Operation) {
        self.mark_painted();
        self.ops.push(op);
    }

    pub fn mark_painted(&mut self) {
        for group in &mut self.groups {
            group.painted = true;
        }
    }

    /// Records that marks inside the open groups were removed.
    pub fn note_dropped(&mut self) {
        for group in &mut self.groups {
            group.dropped = true;
        }
    }

    pub fn save_state(&mut self) {
        self.groups.push(Group {
            start: self.ops.len(),
            painted: false,
            dropped: false,
        });
        self.ops.push(Operation::new("q", vec![]));
    }

    pub fn restore_state(&mut self) {
        match self.groups.pop() {
            Some(group) if group.dropped && !group.painted => {
                self.ops.truncate(group.start);
            }
            _ => self.ops.push(Operation::new("Q", vec![])),
        }
    }

    /// Emits `q`, runs `body`, then `Q` whatever `body` returned.
    pub fn scoped<T>(&mut self, body: impl FnOnce(&mut Canvas) -> T) -> T {
        self.ops.push(Operation::new("q", vec![]));
        let open_groups = self.groups.len();
        let result = body(self);
        self.groups.truncate(open_groups);
        self.ops.push(Operation::new("Q", vec![]));
        result
    }

    pub fn set_fill_color(&mut self, color: Color) {
        self.ops.push(Operation::new(
            "rg",
            vec![
                real(color.r as f64),
                real(color.g as f64),
                real(color.b as f64),
            ],
        ));
    }

    pub fn rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.ops.push(Operation::new(
            "re",
            vec![real(x), real(y), real(width), real(height)],
        ));
    }

    /// Emits device-space contours as user-space path construction.
    pub fn polygons(&mut self, contours: &[Contour], device_to_user: Matrix) {
        for contour in contours {
            let mut points = contour.iter().map(|p| device_to_user.transform_point(p.x, p.y));
            let Some(first) = points.next() else {
                continue;
            };
            self.ops
                .push(Operation::new("m", vec![real(first.x), real(first.y)]));
            for p in points {
                self.ops.push(Operation::new("l", vec![real(p.x), real(p.y)]));
            }
            self.ops.push(Operation::new("h", vec![]));
        }
    }

    pub fn fill(&mut self, rule: FillRule) {
        let operator = match rule {
            FillRule::NonZero => "f",
            FillRule::EvenOdd => "f*",
        };
        self.paint(Operation::new(operator, vec![]));
    }

    pub fn clip(&mut self, rule: FillRule) {
        let operator = match rule {
            FillRule::NonZero => "W",
            FillRule::EvenOdd => "W*",
        };
        self.ops.push(Operation::new(operator, vec![]));
        self.ops.push(Operation::new("n", vec![]));
    }

    /// Emits a `TJ`. One holding only displacements moves the text
    /// position without marking the page.
    pub fn show_adjusted(&mut self, items: Vec<LoObject>) {
        let op = Operation::new("TJ", vec![LoObject::Array(items)]);
        if op.operands[0]
            .as_array()
            .is_ok_and(|items| items.iter().any(|o| matches!(o, LoObject::String(..))))
        {
            self.paint(op);
        } else {
            self.push(op);
        }
    }

    pub fn finish(self) -> Vec<Operation> {
        self.ops
    }
}
