use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary as LoDictionary, Object as LoObject, ObjectId};
use tracing::{debug, trace, warn};

use crate::canvas::Canvas;
use crate::compositor::{Closing, composite, overpaints, without_overpaint};
use crate::error::RedactError;
use crate::geometry::{BBox, FillRule, Matrix, subtract_boxes};
use crate::image_redact::{ImageOutcome, ImageRewrite, redact_image};
use crate::metrics::PageMetrics;
use crate::ops::{OpKind, Paint, op, op_name};
use crate::path_clip::{PartOutcome, PathOutcome, PendingPath, clip_painted_path, fill_contours};
use crate::region::{Coverage, RegionIndex};
use crate::resources::{FormXObject, PageSnapshot, ResourceResolver, XObject};
use crate::state::{ClipPath, GraphicsState, StateTracker};
use crate::text_clip::{TextOutcome, clip_run, layout_run};
use crate::types::{Color, RedactionLocation};

const BUDGET_CHECK_INTERVAL: usize = 256;
const MAX_FORM_DEPTH: usize = 16;
const REDACTED_NAME_PREFIX: &str = "Rd";
// Marked-content properties that can carry the text of removed glyphs.
const TEXT_BEARING_PROPERTIES: [&[u8]; 3] = [b"ActualText", b"Alt", b"E"];

#[derive(Clone, Debug)]
pub(crate) struct ProcessorOptions {
    pub flatten_tolerance: f64,
    pub scrub_image_samples: bool,
    pub fallback_color: Color,
}

/// Wall-clock and cancellation limits shared by all page tasks.
#[derive(Clone, Debug, Default)]
pub(crate) struct Budget {
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Budget {
    pub fn new(deadline: Option<Instant>, cancel: Option<Arc<AtomicBool>>) -> Self {
        Self { deadline, cancel }
    }

    pub fn check(&self) -> Result<(), RedactError> {
        if self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(RedactError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(RedactError::TimedOut);
        }
        Ok(())
    }
}

/// A replacement XObject that still has to be written into the document.
#[derive(Debug)]
pub(crate) enum PendingXObject {
    Image {
        name: Vec<u8>,
        rewrite: ImageRewrite,
    },
    Form {
        name: Vec<u8>,
        source: ObjectId,
        dict: LoDictionary,
        operations: Vec<Operation>,
        xobjects: Vec<PendingXObject>,
    },
}

#[derive(Debug)]
pub(crate) struct StreamOutput {
    pub operations: Vec<Operation>,
    pub xobjects: Vec<PendingXObject>,
    pub fallback: Option<String>,
    pub estimated: bool,
    pub metrics: PageMetrics,
    pub closing: Closing,
}

#[derive(Debug, Clone, Copy)]
struct MarkedSection {
    begin: Option<usize>,
    dropped_text: bool,
}

/// Single forward pass over one content stream.
pub(crate) struct ContentProcessor<'a> {
    regions: &'a RegionIndex,
    resources: &'a dyn ResourceResolver,
    options: &'a ProcessorOptions,
    budget: &'a Budget,
    page_box: BBox,
    tracker: StateTracker,
    canvas: Canvas,
    path: PendingPath,
    xobjects: Vec<PendingXObject>,
    names_in_use: HashSet<Vec<u8>>,
    next_name: usize,
    fallback: Option<String>,
    estimated: bool,
    in_text: bool,
    marked: Vec<MarkedSection>,
    metrics: PageMetrics,
    form_depth: usize,
}

impl<'a> ContentProcessor<'a> {
    pub fn new(
        regions: &'a RegionIndex,
        resources: &'a dyn ResourceResolver,
        options: &'a ProcessorOptions,
        budget: &'a Budget,
        initial: GraphicsState,
        page_box: BBox,
    ) -> Self {
        Self {
            regions,
            resources,
            options,
            budget,
            page_box,
            tracker: StateTracker::new(initial),
            canvas: Canvas::new(),
            path: PendingPath::default(),
            xobjects: Vec::new(),
            names_in_use: resources.xobject_names(),
            next_name: 0,
            fallback: None,
            estimated: false,
            in_text: false,
            marked: Vec::new(),
            metrics: PageMetrics::default(),
            form_depth: 0,
        }
    }

    fn nested(mut self, depth: usize) -> Self {
        self.form_depth = depth;
        self
    }

    pub fn run(mut self, operations: &[Operation]) -> Result<StreamOutput, RedactError> {
        for (idx, operation) in operations.iter().enumerate() {
            if idx % BUDGET_CHECK_INTERVAL == 0 {
                self.budget.check()?;
            }
            self.metrics.operators_in += 1;
            if self.fallback.is_some() {
                self.pass_through(operation)?;
            } else {
                self.dispatch(operation)?;
            }
        }
        Ok(self.finish())
    }

    fn dispatch(&mut self, operation: &Operation) -> Result<(), RedactError> {
        let kind = OpKind::of(&operation.operator);
        trace!(operator = %operation.operator, ?kind, "dispatch");
        match kind {
            OpKind::SaveState => {
                self.tracker.apply(operation, kind, self.resources)?;
                self.canvas.save_state();
            }
            OpKind::RestoreState => match self.tracker.apply(operation, kind, self.resources) {
                Ok(()) => self.canvas.restore_state(),
                Err(err) if err.triggers_fallback() => self.abandon(err.to_string()),
                Err(err) => return Err(err),
            },
            OpKind::PathConstruct => {
                self.tracker.apply(operation, kind, self.resources)?;
                self.path.push(operation);
            }
            OpKind::Clip(rule) => {
                self.tracker.apply(operation, kind, self.resources)?;
                self.path.clip = Some(rule);
            }
            OpKind::PathPaint(paint) => {
                self.tracker.apply(operation, kind, self.resources)?;
                self.paint_path(operation, paint);
            }
            OpKind::BeginText | OpKind::EndText => {
                self.tracker.apply(operation, kind, self.resources)?;
                self.in_text = kind == OpKind::BeginText;
                self.canvas.push(operation.clone());
            }
            OpKind::TextShow => {
                self.tracker.apply(operation, kind, self.resources)?;
                self.show_text(operation);
            }
            OpKind::XObject => {
                self.tracker.apply(operation, kind, self.resources)?;
                self.invoke_xobject(operation)?;
            }
            OpKind::InlineImage => {
                self.tracker.apply(operation, kind, self.resources)?;
                self.inline_image(operation);
            }
            OpKind::Shading => {
                self.tracker.apply(operation, kind, self.resources)?;
                self.shading(operation)?;
            }
            OpKind::MarkedContentBegin => {
                self.tracker.apply(operation, kind, self.resources)?;
                let begin = (operation.operator == "BDC").then(|| self.canvas.len());
                self.marked.push(MarkedSection {
                    begin,
                    dropped_text: false,
                });
                self.canvas.push(operation.clone());
            }
            OpKind::MarkedContentEnd => {
                self.tracker.apply(operation, kind, self.resources)?;
                self.end_marked_content();
                self.canvas.push(operation.clone());
            }
            OpKind::Unknown => {
                self.tracker.apply(operation, kind, self.resources)?;
                if self.regions.is_empty() {
                    self.canvas.paint(operation.clone());
                } else {
                    let err = RedactError::UnsupportedOperator {
                        operator: operation.operator.clone(),
                    };
                    self.abandon(err.to_string());
                    self.canvas.paint(operation.clone());
                }
            }
            OpKind::TextPosition
            | OpKind::TextState
            | OpKind::Transform
            | OpKind::GraphicsState
            | OpKind::Color
            | OpKind::MarkedPoint
            | OpKind::GlyphMetrics
            | OpKind::Compatibility => {
                self.tracker.apply(operation, kind, self.resources)?;
                self.canvas.push(operation.clone());
            }
        }
        Ok(())
    }

    /// Stops rewriting: everything from here on is copied verbatim and the
    /// page's regions get overpainted.
    fn abandon(&mut self, reason: String) {
        if self.fallback.is_some() {
            return;
        }
        warn!(reason = %reason, "falling back to overpaint");
        let pending = self.path.take();
        for path_op in pending.ops {
            self.canvas.push(path_op);
        }
        if let Some(rule) = pending.clip {
            self.canvas.push(clip_operator(rule));
        }
        self.fallback = Some(reason);
    }

    fn pass_through(&mut self, operation: &Operation) -> Result<(), RedactError> {
        let kind = OpKind::of(&operation.operator);
        match kind {
            OpKind::SaveState => {
                self.tracker.save();
                self.canvas.save_state();
            }
            OpKind::RestoreState => {
                // Unmatched restores are dropped so the stream stays balanced.
                if self.tracker.restore().is_ok() {
                    self.canvas.restore_state();
                }
            }
            _ => {
                if matches!(kind, OpKind::BeginText | OpKind::EndText) {
                    self.in_text = kind == OpKind::BeginText;
                }
                self.tracker.apply(operation, kind, self.resources)?;
                self.canvas.paint(operation.clone());
            }
        }
        Ok(())
    }

    fn paint_path(&mut self, operation: &Operation, paint: Paint) {
        let path = self.path.take();
        let state = self.tracker.current();
        let ctm = state.ctm;
        let stroke_as_fill = state.stroke_color.as_fill();
        let clip = path.clip.map(|rule| ClipPath {
            contours: fill_contours(&path.segments, ctm, self.options.flatten_tolerance),
            rule,
        });

        let unpainted = paint.fill.is_none() && !paint.stroke;
        let outcome = if unpainted || self.regions.is_empty() {
            PathOutcome::Unchanged
        } else {
            let mut closed = path.clone();
            if paint.close {
                closed.close_for_paint();
            }
            clip_painted_path(
                &closed,
                paint,
                state,
                self.regions,
                self.options.flatten_tolerance,
            )
        };

        match outcome {
            PathOutcome::Unchanged => {
                self.emit_path_ops(&path, false);
                if let Some(rule) = path.clip {
                    self.canvas.push(clip_operator(rule));
                }
                self.canvas.paint(operation.clone());
            }
            PathOutcome::Rewritten { fill, stroke } => {
                let removed = |part: &Option<PartOutcome>| match part {
                    None => true,
                    Some(PartOutcome::Clipped(contours)) => contours.is_empty(),
                    Some(PartOutcome::Keep) => false,
                };
                if removed(&fill) && removed(&stroke) {
                    self.metrics.paths_dropped += 1;
                } else {
                    self.metrics.paths_clipped += 1;
                }
                self.canvas.note_dropped();
                let device_to_user = ctm.inverse();

                if let (Some(part), Some(rule)) = (fill, paint.fill) {
                    match part {
                        PartOutcome::Keep => {
                            self.emit_path_ops(&path, paint.close);
                            self.canvas.fill(rule);
                        }
                        PartOutcome::Clipped(contours) => {
                            if let (false, Some(inverse)) = (contours.is_empty(), device_to_user) {
                                self.canvas.polygons(&contours, inverse);
                                self.canvas.fill(rule);
                            }
                        }
                    }
                }
                match stroke {
                    Some(PartOutcome::Keep) => {
                        self.emit_path_ops(&path, paint.close);
                        self.canvas.paint(op("S", vec![]));
                    }
                    Some(PartOutcome::Clipped(contours)) if !contours.is_empty() => {
                        if let Some(inverse) = device_to_user {
                            self.canvas.scoped(|c| {
                                for color_op in stroke_as_fill {
                                    c.push(color_op);
                                }
                                c.polygons(&contours, inverse);
                                c.fill(FillRule::NonZero);
                            });
                        }
                    }
                    _ => {}
                }
                if let Some(rule) = path.clip {
                    self.emit_path_ops(&path, false);
                    self.canvas.clip(rule);
                }
            }
        }

        if let Some(clip) = clip {
            self.tracker.push_clip(clip);
        }
    }

    fn emit_path_ops(&mut self, path: &PendingPath, close: bool) {
        for path_op in &path.ops {
            self.canvas.push(path_op.clone());
        }
        if close {
            self.canvas.push(op("h", vec![]));
        }
    }

    fn show_text(&mut self, operation: &Operation) {
        let quote = matches!(operation.operator.as_str(), "'" | "\"");
        if quote {
            self.tracker.apply_quote_prefix(operation);
        }
        let items: Vec<LoObject> = match operation.operator.as_str() {
            "TJ" => operation
                .operands
                .first()
                .and_then(|o| o.as_array().ok())
                .cloned()
                .unwrap_or_default(),
            "\"" => operation.operands.get(2).cloned().into_iter().collect(),
            _ => operation.operands.first().cloned().into_iter().collect(),
        };

        let vertical_reach = {
            let state = self.tracker.current();
            let vertical = state.text.font.as_ref().is_some_and(|f| f.vertical);
            vertical.then(|| vertical_text_reach(state, &items))
        };
        if let Some(reach) = vertical_reach {
            if !self.regions.is_empty() && self.regions.classify(&reach) != Coverage::None {
                self.abandon("vertical text near a region".to_string());
            }
            self.canvas.paint(operation.clone());
            return;
        }

        let state = self.tracker.current();
        let run = layout_run(&items, state);
        self.estimated |= run.estimated;
        let outcome = if self.regions.is_empty() {
            TextOutcome::Unchanged
        } else {
            clip_run(&run, state, self.regions)
        };
        match outcome {
            TextOutcome::Unchanged => self.canvas.paint(operation.clone()),
            TextOutcome::Rewritten { items, dropped } => {
                self.metrics.text_operators_rewritten += 1;
                self.metrics.glyphs_dropped += dropped;
                for section in &mut self.marked {
                    section.dropped_text = true;
                }
                self.canvas.note_dropped();
                if operation.operator == "\"" {
                    if let Some(aw) = operation.operands.first() {
                        self.canvas.push(op("Tw", vec![aw.clone()]));
                    }
                    if let Some(ac) = operation.operands.get(1) {
                        self.canvas.push(op("Tc", vec![ac.clone()]));
                    }
                }
                if quote {
                    self.canvas.push(op("T*", vec![]));
                }
                self.canvas.show_adjusted(items);
            }
        }
        self.tracker.advance_text(run.advance, run.slack);
    }

    fn invoke_xobject(&mut self, operation: &Operation) -> Result<(), RedactError> {
        let xobject = op_name(operation, 0).and_then(|name| self.resources.xobject(name));
        let Some(xobject) = xobject else {
            self.canvas.paint(operation.clone());
            return Ok(());
        };
        if self.regions.is_empty() {
            self.canvas.paint(operation.clone());
            return Ok(());
        }
        match xobject {
            XObject::Image(image) => {
                let ctm = self.tracker.current().ctm;
                match redact_image(&image, ctm, self.regions, self.options.scrub_image_samples) {
                    Ok(ImageOutcome::Unchanged) => self.canvas.paint(operation.clone()),
                    Ok(ImageOutcome::Dropped) => {
                        self.metrics.images_dropped += 1;
                        self.canvas.note_dropped();
                    }
                    Ok(ImageOutcome::Rewritten(rewrite)) => {
                        self.metrics.images_redacted += 1;
                        let name = self.fresh_name();
                        self.canvas.paint(op("Do", vec![LoObject::Name(name.clone())]));
                        self.xobjects.push(PendingXObject::Image { name, rewrite });
                    }
                    Err(err) => {
                        warn!(error = %err, "dropping image that cannot be rewritten");
                        self.metrics.images_dropped += 1;
                        self.canvas.note_dropped();
                    }
                }
            }
            XObject::Form(form) => self.invoke_form(operation, &form)?,
            XObject::Opaque(reason) => {
                self.abandon(format!("xobject with unknown extent: {reason}"));
                self.canvas.paint(operation.clone());
            }
        }
        Ok(())
    }

    fn invoke_form(&mut self, operation: &Operation, form: &Arc<FormXObject>) -> Result<(), RedactError> {
        let state = self.tracker.current().clone();
        let form_ctm = form.matrix.concat(state.ctm);
        let footprint = BBox::of_points(
            &form
                .bbox
                .to_contour()
                .iter()
                .map(|p| form_ctm.transform_point(p.x, p.y))
                .collect::<Vec<_>>(),
        );
        if self.regions.classify(&footprint) == Coverage::None {
            self.canvas.paint(operation.clone());
            return Ok(());
        }
        if self.form_depth >= MAX_FORM_DEPTH {
            self.abandon("form xobjects nested too deeply".to_string());
            self.canvas.paint(operation.clone());
            return Ok(());
        }
        let decoded = form
            .stream
            .get_plain_content()
            .and_then(|bytes| Content::decode(&bytes));
        let operations = match decoded {
            Ok(content) => content.operations,
            Err(err) => {
                self.abandon(format!("form {} {} R: {err}", form.id.0, form.id.1));
                self.canvas.paint(operation.clone());
                return Ok(());
            }
        };

        let mut initial = state;
        initial.ctm = form_ctm;
        let resources = form.resources.clone();
        let output = ContentProcessor::new(
            self.regions,
            resources.as_ref(),
            self.options,
            self.budget,
            initial,
            self.page_box,
        )
        .nested(self.form_depth + 1)
        .run(&operations)?;

        self.estimated |= output.estimated;
        let changed = output.metrics.changed_content() || !output.xobjects.is_empty();
        let mut child = output.metrics;
        child.operators_in = 0;
        child.operators_out = 0;
        self.metrics += &child;

        if changed {
            self.metrics.forms_rewritten += 1;
            self.canvas.note_dropped();
            let name = self.fresh_name();
            self.canvas.paint(op("Do", vec![LoObject::Name(name.clone())]));
            self.xobjects.push(PendingXObject::Form {
                name,
                source: form.id,
                dict: form.stream.dict.clone(),
                operations: output.operations,
                xobjects: output.xobjects,
            });
        } else {
            self.canvas.paint(operation.clone());
        }
        if let Some(reason) = output.fallback {
            self.abandon(reason);
        }
        Ok(())
    }

    /// Inline images arrive as one `BI` operation holding the whole image.
    fn inline_image(&mut self, operation: &Operation) {
        if operation.operator != "BI" {
            self.canvas.paint(operation.clone());
            return;
        }
        let footprint = self.tracker.current().ctm.unit_square();
        if !self.regions.is_empty() && self.regions.overlaps_contour(&footprint) {
            self.metrics.inline_images_dropped += 1;
            self.canvas.note_dropped();
        } else {
            self.canvas.paint(operation.clone());
        }
    }

    fn shading(&mut self, operation: &Operation) -> Result<(), RedactError> {
        if self.regions.is_empty() {
            self.canvas.paint(operation.clone());
            return Ok(());
        }
        let state = self.tracker.current();
        // A clip path that stays clear of every region keeps the shading out of them.
        let shielded = state.clip.iter().any(|clip| {
            !clip
                .contours
                .iter()
                .any(|contour| self.regions.overlaps_contour(contour))
        });
        let footprint = state.clip.iter().fold(self.page_box, |acc, clip| {
            acc.intersect(&BBox::of_points(clip.contours.iter().flatten()))
        });
        if shielded || self.regions.classify(&footprint) == Coverage::None {
            self.canvas.paint(operation.clone());
            return Ok(());
        }

        self.metrics.shadings_clipped += 1;
        self.canvas.note_dropped();
        let visible = subtract_boxes(&[footprint.to_contour()], self.regions.rects());
        let Some(inverse) = state.ctm.inverse() else {
            return Ok(());
        };
        if visible.is_empty() {
            return Ok(());
        }
        let shading = operation.clone();
        self.canvas.scoped(|c| {
            c.polygons(&visible, inverse);
            c.clip(FillRule::NonZero);
            c.paint(shading);
        });
        Ok(())
    }

    fn end_marked_content(&mut self) {
        let Some(section) = self.marked.pop() else {
            return;
        };
        if !section.dropped_text {
            return;
        }
        let Some(begin) = section.begin else {
            return;
        };
        let Some(begin_op) = self.canvas.op_mut(begin) else {
            return;
        };
        if begin_op.operator != "BDC" {
            return;
        }
        if let Some(LoObject::Dictionary(properties)) = begin_op.operands.get_mut(1) {
            for key in TEXT_BEARING_PROPERTIES {
                properties.remove(key);
            }
        }
    }

    fn fresh_name(&mut self) -> Vec<u8> {
        loop {
            let candidate = format!("{REDACTED_NAME_PREFIX}{}", self.next_name).into_bytes();
            self.next_name += 1;
            if self.names_in_use.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    fn finish(self) -> StreamOutput {
        let base = self.tracker.base();
        let closing = Closing {
            in_text: self.in_text,
            depth: self.tracker.depth(),
            default_base: self.tracker.base_is_initial()
                && base.ctm.is_identity()
                && base.clip.is_empty(),
        };
        let mut metrics = self.metrics;
        let operations = self.canvas.finish();
        metrics.operators_out = operations.len();
        StreamOutput {
            operations,
            xobjects: self.xobjects,
            fallback: self.fallback,
            estimated: self.estimated,
            metrics,
            closing,
        }
    }
}

fn clip_operator(rule: FillRule) -> Operation {
    match rule {
        FillRule::NonZero => op("W", vec![]),
        FillRule::EvenOdd => op("W*", vec![]),
    }
}

/// Conservative device-space reach of vertically written text: one em
/// either side of the origin, extending down by every possible advance.
fn vertical_text_reach(state: &GraphicsState, items: &[LoObject]) -> BBox {
    let t = &state.text;
    let glyphs: usize = items
        .iter()
        .map(|item| match item {
            LoObject::String(bytes, _) => bytes.len(),
            _ => 0,
        })
        .sum();
    let adjust: f64 = items
        .iter()
        .filter(|item| !matches!(item, LoObject::String(..)))
        .filter_map(crate::object::obj_to_f64)
        .map(f64::abs)
        .sum();
    let em = t.font_size.abs().max(1.0);
    let per_glyph = em + t.char_spacing.abs() + t.word_spacing.abs();
    let depth = glyphs as f64 * per_glyph + adjust / 1000.0 * em + em;
    let to_device = t.matrix.concat(state.ctm);
    let corners = [
        to_device.transform_point(-em, em),
        to_device.transform_point(em, em),
        to_device.transform_point(em, -depth),
        to_device.transform_point(-em, -depth),
    ];
    BBox::of_points(&corners)
}

/// How a rewritten page's content should replace the original.
#[derive(Debug)]
pub(crate) enum PageContent {
    Rewritten(Vec<Operation>),
    /// The original streams could not be decoded; they are kept and wrapped,
    /// with `overpaint` drawn after them.
    Wrapped { overpaint: Vec<Operation> },
}

#[derive(Debug)]
pub(crate) struct PageRewrite {
    pub page_index: usize,
    pub page_id: ObjectId,
    pub content: PageContent,
    pub xobjects: Vec<PendingXObject>,
    pub fallback: Option<String>,
    pub estimated: bool,
    pub metrics: PageMetrics,
}

/// Rewrites one page from its snapshot. Runs on a worker thread and never
/// touches the document.
pub(crate) fn rewrite_page(
    snapshot: &PageSnapshot,
    locations: &[RedactionLocation],
    options: &ProcessorOptions,
    budget: &Budget,
) -> Result<PageRewrite, RedactError> {
    budget.check()?;
    let regions = RegionIndex::new(locations);
    debug!(
        page = snapshot.page_index,
        regions = regions.rects().len(),
        "rewriting page"
    );

    let operations = match &snapshot.operations {
        Ok(operations) => operations,
        Err(reason) => {
            let reason = format!("content stream cannot be decoded: {reason}");
            warn!(page = snapshot.page_index, reason = %reason, "wrapping page content");
            let paints = overpaints(&regions, Some(options.fallback_color));
            let mut metrics = PageMetrics::default();
            metrics.overpaints = paints.len();
            let overpaint = composite(Vec::new(), Closing::default(), &paints);
            return Ok(PageRewrite {
                page_index: snapshot.page_index,
                page_id: snapshot.page_id,
                content: PageContent::Wrapped { overpaint },
                xobjects: Vec::new(),
                fallback: Some(reason),
                estimated: false,
                metrics,
            });
        }
    };

    // Overpaint left by an earlier pass is set aside and drawn again below.
    let own_overpaint = [
        overpaints(&regions, Some(options.fallback_color)),
        overpaints(&regions, None),
    ]
    .iter()
    .find_map(|paints| without_overpaint(operations, paints));
    let operations = &operations[..own_overpaint.unwrap_or(operations.len())];

    let output = ContentProcessor::new(
        &regions,
        snapshot.resources.as_ref(),
        options,
        budget,
        GraphicsState::new(Matrix::identity()),
        snapshot.media_box,
    )
    .run(operations)?;

    let fallback_color = output.fallback.is_some().then_some(options.fallback_color);
    let paints = overpaints(&regions, fallback_color);
    let mut metrics = output.metrics;
    metrics.overpaints = paints.len();
    let operations = composite(output.operations, output.closing, &paints);
    metrics.operators_out = operations.len();
    debug!(
        page = snapshot.page_index,
        operators_in = metrics.operators_in,
        operators_out = metrics.operators_out,
        glyphs_dropped = metrics.glyphs_dropped,
        fallback = output.fallback.is_some(),
        "page rewritten"
    );

    Ok(PageRewrite {
        page_index: snapshot.page_index,
        page_id: snapshot.page_id,
        content: PageContent::Rewritten(operations),
        xobjects: output.xobjects,
        fallback: output.fallback,
        estimated: output.estimated,
        metrics,
    })
}
