use std::ops::Range;
use std::sync::Arc;

use lopdf::{Object as LoObject, StringFormat};

use crate::font::{FontMetrics, WidthSource};
use crate::geometry::{Contour, Matrix};
use crate::object::obj_to_f64;
use crate::ops::real;
use crate::region::RegionIndex;
use crate::state::GraphicsState;

#[derive(Clone, Debug)]
pub(crate) struct Glyph {
    pub bytes: Range<usize>,
    /// Nominal displacement in unscaled text space.
    pub advance: f64,
    /// Device-space extent, widened by any width uncertainty.
    pub quad: Contour,
}

#[derive(Clone, Debug)]
pub(crate) enum RunItem {
    Text {
        bytes: Vec<u8>,
        format: StringFormat,
        glyphs: Vec<Glyph>,
    },
    Adjust(f64),
}

/// Laid-out glyphs of one text-showing operator.
#[derive(Clone, Debug)]
pub(crate) struct GlyphRun {
    pub items: Vec<RunItem>,
    pub advance: f64,
    pub slack: (f64, f64),
    pub estimated: bool,
}

impl GlyphRun {
    #[cfg(test)]
    pub fn glyph_count(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                RunItem::Text { glyphs, .. } => glyphs.len(),
                RunItem::Adjust(_) => 0,
            })
            .sum()
    }
}

#[derive(Clone, Debug)]
pub(crate) enum TextOutcome {
    Unchanged,
    Rewritten { items: Vec<LoObject>, dropped: usize },
}

/// Lays out a `TJ` array (or a single string) under the current text state.
pub(crate) fn layout_run(items: &[LoObject], state: &GraphicsState) -> GlyphRun {
    let t = &state.text;
    let font: Arc<FontMetrics> = t
        .font
        .clone()
        .unwrap_or_else(|| Arc::new(FontMetrics::unknown("(none)")));
    let text_to_device: Matrix = t.matrix.concat(state.ctm);
    let (desc, asc) = font.vertical_extent();
    let y0 = desc * t.font_size + t.rise;
    let y1 = asc * t.font_size + t.rise;
    let scale = t.font_size * t.h_scale;

    let mut pen = 0.0f64;
    let (mut pen_lo, mut pen_hi) = (t.slack.0, t.slack.1);
    let mut estimated = font.source() != WidthSource::Font;
    let mut out = Vec::with_capacity(items.len());

    for item in items {
        match item {
            LoObject::String(bytes, format) => {
                let mut glyphs = Vec::with_capacity(bytes.len());
                for (code, range) in font.codes(bytes) {
                    let adv = font.advance(code);
                    estimated |= !adv.is_exact();
                    let mut spacing = t.char_spacing;
                    if font.is_word_space(code, &range) {
                        spacing += t.word_spacing;
                    }
                    let tx_nominal = (adv.nominal * t.font_size + spacing) * t.h_scale;
                    let tx_low = (adv.low * t.font_size + spacing) * t.h_scale;
                    let tx_high = (adv.high * t.font_size + spacing) * t.h_scale;

                    // Glyph box spans the advance width from every possible origin.
                    let starts = [pen + pen_lo, pen + pen_hi];
                    let ends = [
                        pen + pen_lo + adv.low * scale,
                        pen + pen_hi + adv.high * scale,
                    ];
                    let x0 = starts.iter().chain(ends.iter()).copied().fold(f64::INFINITY, f64::min);
                    let x1 = starts.iter().chain(ends.iter()).copied().fold(f64::NEG_INFINITY, f64::max);
                    let quad = vec![
                        text_to_device.transform_point(x0, y0),
                        text_to_device.transform_point(x1, y0),
                        text_to_device.transform_point(x1, y1),
                        text_to_device.transform_point(x0, y1),
                    ];
                    glyphs.push(Glyph {
                        bytes: range,
                        advance: tx_nominal,
                        quad,
                    });

                    pen += tx_nominal;
                    pen_lo += tx_low.min(tx_high) - tx_nominal;
                    pen_hi += tx_high.max(tx_low) - tx_nominal;
                }
                out.push(RunItem::Text {
                    bytes: bytes.clone(),
                    format: *format,
                    glyphs,
                });
            }
            other => {
                if let Some(n) = obj_to_f64(other) {
                    pen += -n / 1000.0 * scale;
                    out.push(RunItem::Adjust(n));
                }
            }
        }
    }

    GlyphRun {
        items: out,
        advance: pen,
        slack: (pen_lo, pen_hi),
        estimated,
    }
}

/// Drops every glyph whose extent touches a region and closes the gaps with
/// `TJ` displacements so kept glyphs stay where they were.
pub(crate) fn clip_run(run: &GlyphRun, state: &GraphicsState, regions: &RegionIndex) -> TextOutcome {
    let scale = state.text.font_size * state.text.h_scale;
    let mut dropped = 0usize;
    let mut items: Vec<LoObject> = Vec::new();
    let mut pending_adjust = 0.0f64;
    let mut has_adjust = false;

    let flush_adjust = |items: &mut Vec<LoObject>, pending: &mut f64, has: &mut bool| {
        if *has {
            items.push(real(*pending));
            *pending = 0.0;
            *has = false;
        }
    };

    for item in &run.items {
        match item {
            RunItem::Adjust(n) => {
                pending_adjust += n;
                has_adjust = true;
            }
            RunItem::Text {
                bytes,
                format,
                glyphs,
            } => {
                let mut kept: Vec<u8> = Vec::new();
                for glyph in glyphs {
                    let remove = scale.abs() > f64::EPSILON && regions.overlaps_contour(&glyph.quad);
                    if remove {
                        dropped += 1;
                        if !kept.is_empty() {
                            flush_adjust(&mut items, &mut pending_adjust, &mut has_adjust);
                            items.push(LoObject::String(std::mem::take(&mut kept), *format));
                        }
                        pending_adjust += -glyph.advance * 1000.0 / scale;
                        has_adjust = true;
                    } else {
                        if kept.is_empty() {
                            flush_adjust(&mut items, &mut pending_adjust, &mut has_adjust);
                        }
                        kept.extend_from_slice(&bytes[glyph.bytes.clone()]);
                    }
                }
                if !kept.is_empty() {
                    flush_adjust(&mut items, &mut pending_adjust, &mut has_adjust);
                    items.push(LoObject::String(kept, *format));
                }
            }
        }
    }
    flush_adjust(&mut items, &mut pending_adjust, &mut has_adjust);

    if dropped == 0 {
        TextOutcome::Unchanged
    } else {
        TextOutcome::Rewritten { items, dropped }
    }
}

/// Device-space origin of the glyph at `index` within a run.
#[cfg(test)]
pub(crate) fn glyph_origin(
    run: &GlyphRun,
    state: &GraphicsState,
    index: usize,
) -> Option<crate::geometry::Point> {
    let mut pen = 0.0;
    let mut seen = 0;
    let scale = state.text.font_size * state.text.h_scale;
    for item in &run.items {
        match item {
            RunItem::Adjust(n) => pen += -n / 1000.0 * scale,
            RunItem::Text { glyphs, .. } => {
                for glyph in glyphs {
                    if seen == index {
                        let m = state.text.matrix.concat(state.ctm);
                        return Some(m.transform_point(pen, state.text.rise));
                    }
                    seen += 1;
                    pen += glyph.advance;
                }
            }
        }
    }
    None
}
