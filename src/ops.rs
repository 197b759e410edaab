use lopdf::Object as LoObject;
use lopdf::content::{Content, Operation};

use crate::geometry::FillRule;
use crate::object::obj_to_f64;

/// How a path-painting operator marks the page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Paint {
    pub fill: Option<FillRule>,
    pub stroke: bool,
    /// Close the current subpath before painting (`s`, `b`, `b*`).
    pub close: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpKind {
    PathConstruct,
    PathPaint(Paint),
    /// Marks the pending path as a clip (`W`, `W*`).
    Clip(FillRule),
    BeginText,
    EndText,
    TextPosition,
    TextShow,
    TextState,
    XObject,
    InlineImage,
    Shading,
    MarkedContentBegin,
    MarkedContentEnd,
    MarkedPoint,
    SaveState,
    RestoreState,
    Transform,
    GraphicsState,
    Color,
    /// Type3 glyph-program metrics (`d0`, `d1`).
    GlyphMetrics,
    Compatibility,
    Unknown,
}

impl OpKind {
    pub fn of(operator: &str) -> OpKind {
        match operator {
            "m" | "l" | "c" | "v" | "y" | "h" | "re" => OpKind::PathConstruct,
            "S" => OpKind::PathPaint(Paint {
                fill: None,
                stroke: true,
                close: false,
            }),
            "s" => OpKind::PathPaint(Paint {
                fill: None,
                stroke: true,
                close: true,
            }),
            "f" | "F" => OpKind::PathPaint(Paint {
                fill: Some(FillRule::NonZero),
                stroke: false,
                close: false,
            }),
            "f*" => OpKind::PathPaint(Paint {
                fill: Some(FillRule::EvenOdd),
                stroke: false,
                close: false,
            }),
            "B" => OpKind::PathPaint(Paint {
                fill: Some(FillRule::NonZero),
                stroke: true,
                close: false,
            }),
            "B*" => OpKind::PathPaint(Paint {
                fill: Some(FillRule::EvenOdd),
                stroke: true,
                close: false,
            }),
            "b" => OpKind::PathPaint(Paint {
                fill: Some(FillRule::NonZero),
                stroke: true,
                close: true,
            }),
            "b*" => OpKind::PathPaint(Paint {
                fill: Some(FillRule::EvenOdd),
                stroke: true,
                close: true,
            }),
            "n" => OpKind::PathPaint(Paint {
                fill: None,
                stroke: false,
                close: false,
            }),
            "W" => OpKind::Clip(FillRule::NonZero),
            "W*" => OpKind::Clip(FillRule::EvenOdd),
            "BT" => OpKind::BeginText,
            "ET" => OpKind::EndText,
            "Td" | "TD" | "Tm" | "T*" => OpKind::TextPosition,
            "Tj" | "TJ" | "'" | "\"" => OpKind::TextShow,
            "Tc" | "Tw" | "Tz" | "TL" | "Tf" | "Tr" | "Ts" => OpKind::TextState,
            "Do" => OpKind::XObject,
            "BI" | "ID" | "EI" => OpKind::InlineImage,
            "sh" => OpKind::Shading,
            "BMC" | "BDC" => OpKind::MarkedContentBegin,
            "EMC" => OpKind::MarkedContentEnd,
            "MP" | "DP" => OpKind::MarkedPoint,
            "q" => OpKind::SaveState,
            "Q" => OpKind::RestoreState,
            "cm" => OpKind::Transform,
            "w" | "J" | "j" | "M" | "d" | "ri" | "i" | "gs" => OpKind::GraphicsState,
            "CS" | "cs" | "SC" | "SCN" | "sc" | "scn" | "G" | "g" | "RG" | "rg" | "K" | "k" => {
                OpKind::Color
            }
            "d0" | "d1" => OpKind::GlyphMetrics,
            "BX" | "EX" => OpKind::Compatibility,
            _ => OpKind::Unknown,
        }
    }
}

pub(crate) fn op_f64(op: &Operation, idx: usize) -> Option<f64> {
    obj_to_f64(op.operands.get(idx)?)
}

pub(crate) fn op_name(op: &Operation, idx: usize) -> Option<&[u8]> {
    op.operands.get(idx)?.as_name().ok()
}

pub(crate) fn op_f64_n<const N: usize>(op: &Operation) -> Option<[f64; N]> {
    if op.operands.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    for (idx, slot) in out.iter_mut().enumerate() {
        *slot = op_f64(op, idx)?;
    }
    Some(out)
}

pub(crate) fn real(value: f64) -> LoObject {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    if rounded.fract() == 0.0 && rounded.abs() < i32::MAX as f64 {
        LoObject::Integer(rounded as i64)
    } else {
        LoObject::Real(rounded as f32)
    }
}

pub(crate) fn op(operator: &str, operands: Vec<LoObject>) -> Operation {
    Operation::new(operator, operands)
}

/// Serializes operations as content stream bytes. The decoder folds an
/// inline image into a single `BI` operation carrying a stream; those are
/// written back out as `BI <entries> ID <data> EI`.
pub(crate) fn encode_operations(operations: &[Operation]) -> lopdf::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut run_start = 0;
    for (idx, operation) in operations.iter().enumerate() {
        let Some(image) = inline_image_stream(operation) else {
            continue;
        };
        append_operations(&mut out, &operations[run_start..idx])?;
        append_inline_image(&mut out, image)?;
        run_start = idx + 1;
    }
    append_operations(&mut out, &operations[run_start..])?;
    Ok(out)
}

fn inline_image_stream(operation: &Operation) -> Option<&lopdf::Stream> {
    if operation.operator != "BI" {
        return None;
    }
    match operation.operands.first() {
        Some(LoObject::Stream(stream)) => Some(stream),
        _ => None,
    }
}

fn append_operations(out: &mut Vec<u8>, operations: &[Operation]) -> lopdf::Result<()> {
    if operations.is_empty() {
        return Ok(());
    }
    if !out.is_empty() {
        out.push(b'\n');
    }
    out.extend(Content { operations }.encode()?);
    Ok(())
}

fn append_inline_image(out: &mut Vec<u8>, image: &lopdf::Stream) -> lopdf::Result<()> {
    let entries: Vec<LoObject> = image
        .dict
        .iter()
        .filter(|(key, _)| key.as_slice() != b"Length")
        .flat_map(|(key, value)| [LoObject::Name(key.clone()), value.clone()])
        .collect();
    if !out.is_empty() {
        out.push(b'\n');
    }
    out.extend_from_slice(b"BI ");
    // Entries are written as the operands of `ID`.
    out.extend(
        Content {
            operations: vec![op("ID", entries)],
        }
        .encode()?,
    );
    out.push(b' ');
    out.extend_from_slice(&image.content);
    out.extend_from_slice(b"\nEI");
    Ok(())
}
