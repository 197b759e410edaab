use lopdf::content::Operation;

use crate::canvas::Canvas;
use crate::geometry::{BBox, FillRule};
use crate::object::obj_to_f64;
use crate::ops::op;
use crate::region::RegionIndex;
use crate::types::Color;

/// What is still open at the end of a rewritten stream.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Closing {
    pub in_text: bool,
    pub depth: usize,
    /// The state outside every save group is the page default.
    pub default_base: bool,
}

impl Default for Closing {
    fn default() -> Self {
        Self {
            in_text: false,
            depth: 0,
            default_base: true,
        }
    }
}

/// Rectangles to overpaint: explicitly colored regions, or every region
/// when `fallback` supplies a color for the uncolored ones.
pub(crate) fn overpaints(regions: &RegionIndex, fallback: Option<Color>) -> Vec<(BBox, Color)> {
    match fallback {
        Some(color) => regions.all_with_default(color).collect(),
        None => regions.colored().collect(),
    }
}

fn overpaint_ops(paints: &[(BBox, Color)]) -> Vec<Operation> {
    let mut canvas = Canvas::new();
    for (rect, color) in paints {
        canvas.scoped(|c| {
            c.set_fill_color(*color);
            c.rect(rect.x0, rect.y0, rect.width(), rect.height());
            c.fill(FillRule::NonZero);
        });
    }
    canvas.finish()
}

fn same_operation(a: &Operation, b: &Operation) -> bool {
    a.operator == b.operator
        && a.operands.len() == b.operands.len()
        && a.operands.iter().zip(&b.operands).all(|(x, y)| {
            match (obj_to_f64(x), obj_to_f64(y)) {
                (Some(x), Some(y)) => (x - y).abs() < 1e-3,
                _ => false,
            }
        })
}

fn ends_with(operations: &[Operation], fills: &[Operation]) -> bool {
    operations.len() >= fills.len()
        && operations[operations.len() - fills.len()..]
            .iter()
            .zip(fills)
            .all(|(a, b)| same_operation(a, b))
}

/// Length of `operations` without an overpaint of `paints` at its end.
pub(crate) fn without_overpaint(operations: &[Operation], paints: &[(BBox, Color)]) -> Option<usize> {
    if paints.is_empty() {
        return None;
    }
    let fills = overpaint_ops(paints);
    ends_with(operations, &fills).then(|| operations.len() - fills.len())
}

/// Closes whatever the stream left open and appends the overpaint fills in
/// default user space. A stream that already ends with the same fills is
/// returned as is.
pub(crate) fn composite(
    mut operations: Vec<Operation>,
    closing: Closing,
    paints: &[(BBox, Color)],
) -> Vec<Operation> {
    if paints.is_empty() {
        return operations;
    }
    let fills = overpaint_ops(paints);
    if ends_with(&operations, &fills) {
        return operations;
    }

    let mut out = Vec::with_capacity(operations.len() + fills.len() + closing.depth + 4);
    let wrap = !closing.default_base;
    if wrap {
        out.push(op("q", vec![]));
    }
    out.append(&mut operations);
    if closing.in_text {
        out.push(op("ET", vec![]));
    }
    out.extend((0..closing.depth).map(|_| op("Q", vec![])));
    if wrap {
        out.push(op("Q", vec![]));
    }
    out.extend(fills);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rect, RedactionLocation};

    fn regions() -> RegionIndex {
        RegionIndex::new(&[
            RedactionLocation::new(0, Rect::new(10.0, 20.0, 30.0, 40.0))
                .with_color(Color::rgb(1.0, 0.0, 0.0)),
            RedactionLocation::new(0, Rect::new(100.0, 100.0, 10.0, 10.0)),
        ])
    }

    fn operators(ops: &[Operation]) -> Vec<&str> {
        ops.iter().map(|o| o.operator.as_str()).collect()
    }

    #[test]
    fn only_colored_regions_are_painted_without_fallback() {
        let paints = overpaints(&regions(), None);
        assert_eq!(paints.len(), 1);
        let ops = composite(vec![op("n", vec![])], Closing::default(), &paints);
        assert_eq!(operators(&ops), vec!["n", "q", "rg", "re", "f", "Q"]);
        let re = &ops[3];
        let values: Vec<f64> = re.operands.iter().filter_map(obj_to_f64).collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn fallback_paints_every_region() {
        let paints = overpaints(&regions(), Some(Color::BLACK));
        assert_eq!(paints.len(), 2);
        assert_eq!(paints[0].1, Color::rgb(1.0, 0.0, 0.0));
        assert_eq!(paints[1].1, Color::BLACK);
    }

    #[test]
    fn open_state_is_closed_before_painting() {
        let paints = overpaints(&regions(), None);
        let closing = Closing {
            in_text: true,
            depth: 2,
            default_base: false,
        };
        let ops = composite(vec![op("cm", vec![])], closing, &paints);
        assert_eq!(
            operators(&ops),
            vec!["q", "cm", "ET", "Q", "Q", "Q", "q", "rg", "re", "f", "Q"]
        );
    }

    #[test]
    fn trailing_overpaint_is_recognized() {
        let paints = overpaints(&regions(), None);
        let ops = composite(vec![op("n", vec![])], Closing::default(), &paints);
        assert_eq!(without_overpaint(&ops, &paints), Some(1));
        assert_eq!(without_overpaint(&ops[..ops.len() - 1], &paints), None);
        let all = overpaints(&regions(), Some(Color::BLACK));
        assert_eq!(without_overpaint(&ops, &all), None);
    }

    #[test]
    fn existing_overpaint_is_not_repeated() {
        let paints = overpaints(&regions(), None);
        let once = composite(vec![op("n", vec![])], Closing::default(), &paints);
        let twice = composite(once.clone(), Closing::default(), &paints);
        assert_eq!(operators(&once), operators(&twice));
    }
}
