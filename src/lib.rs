mod canvas;
mod compositor;
mod error;
mod finalize;
mod flate;
mod font;
mod geometry;
mod image_redact;
mod metrics;
mod object;
mod ops;
mod path_clip;
mod processor;
mod region;
mod resources;
mod state;
mod text_clip;
mod types;

pub use error::RedactError;
pub use metrics::{PageMetrics, PageOutcome, PageReport, RedactionReport};
pub use types::{Color, Pt, Rect, RedactionLocation};

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use lopdf::{Document as LoDocument, ObjectId as LoObjectId};
use tracing::{debug, warn};

use finalize::apply_page_rewrite;
use geometry::BBox;
use processor::{Budget, PageRewrite, ProcessorOptions, rewrite_page};
use resources::ResourceLoader;

/// Removes content under caller-supplied rectangles from a PDF document.
///
/// Pages are rewritten on a private worker pool and written back into the
/// document one by one; a page that fails or runs out of time is left as it
/// was and reported as failed.
#[derive(Debug, Clone)]
pub struct Redactor {
    workers: usize,
    timeout: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
    options: ProcessorOptions,
    remove_annotations: bool,
    prune_unreferenced: bool,
}

#[derive(Debug, Clone)]
pub struct RedactorBuilder {
    workers: Option<usize>,
    timeout: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
    fallback_color: Color,
    flatten_tolerance: f32,
    scrub_image_samples: bool,
    remove_annotations: bool,
    prune_unreferenced: bool,
}

impl Default for RedactorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RedactorBuilder {
    pub fn new() -> Self {
        Self {
            workers: None,
            timeout: None,
            cancel: None,
            fallback_color: Color::BLACK,
            flatten_tolerance: 0.05,
            scrub_image_samples: true,
            remove_annotations: true,
            prune_unreferenced: true,
        }
    }

    /// Worker threads used for page rewriting. Defaults to the rayon global
    /// pool size.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Wall-clock budget for one `redact` call. Pages not finished in time are
    /// reported as failed and left untouched.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Setting the flag abandons pages that have not finished yet.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Overpaint color for uncolored regions on pages that fall back to
    /// overpainting.
    pub fn fallback_color(mut self, color: Color) -> Self {
        self.fallback_color = color;
        self
    }

    /// Largest device-space deviation allowed when curves are flattened.
    pub fn flatten_tolerance(mut self, tolerance: f32) -> Self {
        self.flatten_tolerance = tolerance;
        self
    }

    /// Also zero the color samples of covered image pixels, not just their
    /// alpha.
    pub fn scrub_image_samples(mut self, enabled: bool) -> Self {
        self.scrub_image_samples = enabled;
        self
    }

    pub fn remove_annotations(mut self, enabled: bool) -> Self {
        self.remove_annotations = enabled;
        self
    }

    /// Drop objects that are unreachable after rewriting, such as replaced
    /// content streams and images.
    pub fn prune_unreferenced(mut self, enabled: bool) -> Self {
        self.prune_unreferenced = enabled;
        self
    }

    pub fn build(self) -> Result<Redactor, RedactError> {
        if self.workers == Some(0) {
            return Err(RedactError::InvalidConfiguration(
                "workers must be at least 1".to_string(),
            ));
        }
        if !self.flatten_tolerance.is_finite() || self.flatten_tolerance <= 0.0 {
            return Err(RedactError::InvalidConfiguration(
                "flatten_tolerance must be a positive number".to_string(),
            ));
        }
        if !self.fallback_color.is_valid() {
            return Err(RedactError::InvalidConfiguration(
                "fallback_color components must be within 0..=1".to_string(),
            ));
        }
        Ok(Redactor {
            workers: self
                .workers
                .unwrap_or_else(|| rayon::current_num_threads().max(1)),
            timeout: self.timeout,
            cancel: self.cancel,
            options: ProcessorOptions {
                flatten_tolerance: self.flatten_tolerance as f64,
                scrub_image_samples: self.scrub_image_samples,
                fallback_color: self.fallback_color,
            },
            remove_annotations: self.remove_annotations,
            prune_unreferenced: self.prune_unreferenced,
        })
    }
}

fn validate_locations(
    locations: &[RedactionLocation],
    page_count: usize,
) -> Result<(), RedactError> {
    for (i, loc) in locations.iter().enumerate() {
        if loc.page_index >= page_count {
            return Err(RedactError::InvalidLocation(format!(
                "location {i}: page index {} out of range (document has {page_count} pages)",
                loc.page_index
            )));
        }
        if !loc.rect.is_representable() {
            return Err(RedactError::InvalidLocation(format!(
                "location {i}: rectangle components must be finite"
            )));
        }
        if let Some(color) = loc.color.filter(|c| !c.is_valid()) {
            return Err(RedactError::InvalidLocation(format!(
                "location {i}: color {color:?} outside 0..=1"
            )));
        }
    }
    Ok(())
}

fn failed_report(page_index: usize, reason: String) -> PageReport {
    PageReport {
        page_index,
        outcome: PageOutcome::Failed { reason },
        metrics: PageMetrics::default(),
        metrics_estimated: false,
        content_sha256: None,
    }
}

impl Redactor {
    pub fn builder() -> RedactorBuilder {
        RedactorBuilder::new()
    }

    /// Redacts `doc` in place. Only pages named by some location are touched
    /// and reported.
    pub fn redact(
        &self,
        doc: &mut LoDocument,
        locations: &[RedactionLocation],
    ) -> Result<RedactionReport, RedactError> {
        if doc.is_encrypted() {
            return Err(RedactError::InvalidConfiguration(
                "document is encrypted".to_string(),
            ));
        }
        let page_ids: Vec<LoObjectId> = doc.get_pages().values().copied().collect();
        validate_locations(locations, page_ids.len())?;

        let mut by_page: BTreeMap<usize, Vec<RedactionLocation>> = BTreeMap::new();
        for loc in locations {
            by_page.entry(loc.page_index).or_default().push(*loc);
        }
        if by_page.is_empty() {
            return Ok(RedactionReport::default());
        }
        let budget = Budget::new(
            self.timeout.map(|timeout| Instant::now() + timeout),
            self.cancel.clone(),
        );

        let mut reports = Vec::with_capacity(by_page.len());
        let mut tasks = Vec::with_capacity(by_page.len());
        {
            let mut loader = ResourceLoader::new(doc);
            for (page_index, page_locations) in by_page {
                match loader.page(page_index, page_ids[page_index]) {
                    Ok(snapshot) => tasks.push((snapshot, page_locations)),
                    Err(err) => {
                        warn!(page = page_index, error = %err, "page resources cannot be loaded");
                        reports.push(failed_report(page_index, err.to_string()));
                    }
                }
            }
        }
        debug!(pages = tasks.len(), workers = self.workers, "redacting pages");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|err| RedactError::WorkerPool(err.to_string()))?;
        let results: Vec<(usize, Result<PageRewrite, RedactError>)> = pool.install(|| {
            use rayon::prelude::*;
            tasks
                .par_iter()
                .map(|(snapshot, page_locations)| {
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        rewrite_page(snapshot, page_locations, &self.options, &budget)
                    }))
                    .unwrap_or_else(|_| {
                        Err(RedactError::WorkerPool("page worker panicked".to_string()))
                    });
                    (snapshot.page_index, result)
                })
                .collect()
        });

        let mut rewritten = 0usize;
        for ((snapshot, page_locations), (page_index, result)) in tasks.iter().zip(results) {
            let report = match result {
                Ok(rewrite) => {
                    let regions: Vec<BBox> = page_locations
                        .iter()
                        .filter(|loc| !loc.rect.is_empty())
                        .map(|loc| loc.rect.to_bbox())
                        .collect();
                    match apply_page_rewrite(doc, rewrite, &regions, self.remove_annotations) {
                        Ok(report) => {
                            rewritten += 1;
                            report
                        }
                        Err(err) => {
                            warn!(page = page_index, error = %err, "page cannot be written back");
                            failed_report(page_index, err.to_string())
                        }
                    }
                }
                Err(err) => {
                    warn!(page = page_index, page_id = ?snapshot.page_id, error = %err, "page left untouched");
                    failed_report(page_index, err.to_string())
                }
            };
            if let PageOutcome::FallbackApplied { reason } = &report.outcome {
                warn!(page = page_index, reason = %reason, "regions overpainted");
            }
            reports.push(report);
        }

        if self.prune_unreferenced && rewritten > 0 {
            let pruned = doc.prune_objects();
            debug!(objects = pruned.len(), "pruned unreferenced objects");
        }
        reports.sort_by_key(|report| report.page_index);
        Ok(RedactionReport { pages: reports })
    }

    /// Loads a PDF from memory, redacts it and serializes the result.
    pub fn redact_pdf_bytes(
        &self,
        bytes: &[u8],
        locations: &[RedactionLocation],
    ) -> Result<(Vec<u8>, RedactionReport), RedactError> {
        let mut doc = LoDocument::load_mem(bytes)?;
        let report = self.redact(&mut doc, locations)?;
        let mut out = Vec::new();
        doc.save_to(&mut out)?;
        Ok((out, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::obj_to_f64;
    use lopdf::content::{Content, Operation};
    use lopdf::{Object as LoObject, Stream as LoStream, dictionary};
    use std::sync::atomic::Ordering;

    struct Fixture {
        doc: LoDocument,
        page_ids: Vec<LoObjectId>,
    }

    fn fixture(pages: &[&str]) -> Fixture {
        fixture_with(pages, |_| Vec::new())
    }

    /// One Helvetica font shared by all pages, plus the XObjects `xobjects`
    /// adds to the document.
    fn fixture_with(
        pages: &[&str],
        xobjects: impl FnOnce(&mut LoDocument) -> Vec<(&'static str, LoObjectId)>,
    ) -> Fixture {
        let mut doc = LoDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let mut named = lopdf::Dictionary::new();
        for (name, id) in xobjects(&mut doc) {
            named.set(name, LoObject::Reference(id));
        }
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => named,
            "ExtGState" => dictionary! {
                "Clear" => dictionary! { "Type" => "ExtGState", "ca" => 0, "CA" => 0 },
            },
        });
        let mut page_ids = Vec::new();
        for content in pages {
            let content_id =
                doc.add_object(LoStream::new(dictionary! {}, content.as_bytes().to_vec()));
            page_ids.push(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }));
        }
        doc.objects.insert(
            pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.iter().map(|id| LoObject::Reference(*id)).collect::<Vec<_>>(),
                "Count" => page_ids.len() as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        Fixture { doc, page_ids }
    }

    fn page_ops(doc: &LoDocument, page_id: LoObjectId) -> Vec<Operation> {
        let bytes = doc.get_page_content(page_id).expect("content");
        Content::decode(&bytes).expect("decode").operations
    }

    fn operators(ops: &[Operation]) -> Vec<&str> {
        ops.iter().map(|o| o.operator.as_str()).collect()
    }

    fn redactor() -> Redactor {
        Redactor::builder().workers(2).build().expect("redactor")
    }

    fn loc(page_index: usize, x: f32, y: f32, w: f32, h: f32) -> RedactionLocation {
        RedactionLocation::new(page_index, Rect::new(x, y, w, h))
    }

    #[test]
    fn straddling_text_keeps_first_retained_glyph_in_place() {
        let mut fx = fixture(&["BT /F1 24 Tf 520 300 Td (ABCDEFG) Tj ET"]);
        let report = redactor()
            .redact(&mut fx.doc, &[loc(0, 50.0, 50.0, 500.0, 500.0)])
            .expect("redact");
        let page = report.page(0).expect("page report");
        assert_eq!(page.outcome, PageOutcome::Redacted);
        assert_eq!(page.metrics.glyphs_dropped, 2);
        assert!(!page.metrics_estimated);

        let ops = page_ops(&fx.doc, fx.page_ids[0]);
        let tj = ops.iter().find(|o| o.operator == "TJ").expect("TJ");
        let items = tj.operands[0].as_array().expect("array");
        let adjust = obj_to_f64(&items[0]).expect("adjust");
        match &items[1] {
            LoObject::String(bytes, _) => assert_eq!(bytes.as_slice(), b"CDEFG"),
            other => panic!("unexpected item {other:?}"),
        }
        // A and B are 667 units wide in Helvetica.
        let first_x = 520.0 - adjust / 1000.0 * 24.0;
        assert!((first_x - (520.0 + 2.0 * 0.667 * 24.0)).abs() < 1e-3);
    }

    #[test]
    fn soft_masked_image_half_covered_gets_zero_alpha_on_that_half() {
        let mut fx = fixture_with(&["q 200 0 0 100 100 100 cm /Im1 Do Q"], |doc| {
            let smask_id = doc.add_object(LoStream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 4,
                    "Height" => 2,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                vec![255; 8],
            ));
            let image_id = doc.add_object(LoStream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 4,
                    "Height" => 2,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                    "SMask" => smask_id,
                },
                vec![10, 20, 30, 40, 50, 60, 70, 80],
            ));
            vec![("Im1", image_id)]
        });
        let report = redactor()
            .redact(&mut fx.doc, &[loc(0, 100.0, 100.0, 100.0, 100.0)])
            .expect("redact");
        assert_eq!(report.page(0).map(|p| p.metrics.images_redacted), Some(1));

        let page_id = fx.page_ids[0];
        let ops = page_ops(&fx.doc, page_id);
        let name = ops
            .iter()
            .find(|o| o.operator == "Do")
            .and_then(|o| o.operands[0].as_name().ok())
            .expect("Do")
            .to_vec();
        assert_ne!(name, b"Im1".to_vec());

        let page = fx.doc.get_object(page_id).and_then(LoObject::as_dict).expect("page");
        let resources = page.get(b"Resources").and_then(LoObject::as_dict).expect("resources");
        let xobjects = resources.get(b"XObject").and_then(LoObject::as_dict).expect("xobjects");
        let image_id = xobjects.get(&name).and_then(LoObject::as_reference).expect("image ref");
        let image = fx.doc.get_object(image_id).and_then(LoObject::as_stream).expect("image");
        let samples = image.decompressed_content().expect("samples");
        assert_eq!(samples, vec![0, 0, 30, 40, 0, 0, 70, 80]);

        let smask_id = image.dict.get(b"SMask").and_then(LoObject::as_reference).expect("smask");
        let smask = fx.doc.get_object(smask_id).and_then(LoObject::as_stream).expect("smask");
        let alpha = smask.decompressed_content().expect("alpha");
        assert_eq!(alpha, vec![0, 0, 255, 255, 0, 0, 255, 255]);
    }

    #[test]
    fn unknown_operator_falls_back_to_overpaint() {
        let mut fx = fixture(&["0 0 612 792 re f 1 2 zz 10 10 m 600 600 l S"]);
        let report = redactor()
            .redact(&mut fx.doc, &[loc(0, 100.0, 100.0, 50.0, 50.0)])
            .expect("redact");
        let page = report.page(0).expect("page report");
        assert!(matches!(page.outcome, PageOutcome::FallbackApplied { .. }));
        assert_eq!(report.fallback_pages().count(), 1);
        assert_eq!(report.failed_pages().count(), 0);

        let ops = page_ops(&fx.doc, fx.page_ids[0]);
        let tail = &ops[ops.len() - 5..];
        assert_eq!(operators(tail), vec!["q", "rg", "re", "f", "Q"]);
        let rect: Vec<f64> = tail[2].operands.iter().filter_map(obj_to_f64).collect();
        assert_eq!(rect, vec![100.0, 100.0, 50.0, 50.0]);
        let rgb: Vec<f64> = tail[1].operands.iter().filter_map(obj_to_f64).collect();
        assert_eq!(rgb, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn overpaint_is_isolated_from_top_level_graphics_state() {
        let locations = [loc(0, 100.0, 100.0, 50.0, 50.0).with_color(Color::rgb(1.0, 0.0, 0.0))];
        let mut fx = fixture(&["/Clear gs 0 0 10 10 re f"]);
        let first = redactor().redact(&mut fx.doc, &locations).expect("redact");
        let once = page_ops(&fx.doc, fx.page_ids[0]);
        assert_eq!(
            operators(&once),
            vec!["q", "gs", "re", "f", "Q", "q", "rg", "re", "f", "Q"]
        );

        let second = redactor().redact(&mut fx.doc, &locations).expect("redact");
        assert_eq!(operators(&page_ops(&fx.doc, fx.page_ids[0])), operators(&once));
        assert_eq!(
            first.page(0).and_then(|p| p.content_sha256.clone()),
            second.page(0).and_then(|p| p.content_sha256.clone())
        );
    }

    #[test]
    fn fallback_overpaint_is_isolated_from_top_level_graphics_state() {
        let mut fx = fixture(&["/Clear gs 1 2 zz BT /F1 12 Tf 72 700 Td (Secret) Tj ET"]);
        let report = redactor()
            .redact(&mut fx.doc, &[loc(0, 60.0, 690.0, 200.0, 30.0)])
            .expect("redact");
        assert!(matches!(
            report.page(0).map(|p| &p.outcome),
            Some(PageOutcome::FallbackApplied { .. })
        ));

        let ops = page_ops(&fx.doc, fx.page_ids[0]);
        let names = operators(&ops);
        assert_eq!(&names[..2], ["q", "gs"]);
        assert_eq!(&names[names.len() - 6..], ["Q", "q", "rg", "re", "f", "Q"]);
        assert_eq!(names.iter().filter(|n| **n == "gs").count(), 1);
    }

    #[test]
    fn non_finite_rectangle_is_rejected() {
        let mut fx = fixture(&["BT /F1 12 Tf 72 700 Td (Secret) Tj ET"]);
        let before = fx.doc.get_page_content(fx.page_ids[0]).expect("content");
        let err = redactor()
            .redact(&mut fx.doc, &[loc(0, 60.0, 700.0, f32::NAN, 40.0)])
            .expect_err("invalid");
        assert!(matches!(err, RedactError::InvalidLocation(_)));
        let err = redactor()
            .redact(&mut fx.doc, &[loc(0, f32::INFINITY, 700.0, 10.0, 40.0)])
            .expect_err("invalid");
        assert!(matches!(err, RedactError::InvalidLocation(_)));
        assert_eq!(fx.doc.get_page_content(fx.page_ids[0]).expect("content"), before);
    }

    #[test]
    fn second_pass_produces_identical_content() {
        let content = "BT /F1 24 Tf 520 300 Td (ABCDEFG) Tj ET 40 40 100 100 re f";
        let locations = [
            loc(0, 50.0, 50.0, 500.0, 500.0).with_color(Color::rgb(0.0, 0.0, 1.0)),
        ];
        let mut fx = fixture(&[content]);
        let first = redactor().redact(&mut fx.doc, &locations).expect("first");
        let once = page_ops(&fx.doc, fx.page_ids[0]);
        let second = redactor().redact(&mut fx.doc, &locations).expect("second");
        let twice = page_ops(&fx.doc, fx.page_ids[0]);

        assert_eq!(operators(&once), operators(&twice));
        assert_eq!(
            first.page(0).and_then(|p| p.content_sha256.clone()),
            second.page(0).and_then(|p| p.content_sha256.clone())
        );
        assert!(!second.totals().changed_content());
    }

    #[test]
    fn empty_location_list_leaves_document_untouched() {
        let content = "BT /F1 12 Tf 72 720 Td (Hello) Tj ET";
        let mut fx = fixture(&[content]);
        let before = fx.doc.get_page_content(fx.page_ids[0]).expect("content");
        let report = redactor().redact(&mut fx.doc, &[]).expect("redact");
        assert!(report.pages.is_empty());
        assert_eq!(fx.doc.get_page_content(fx.page_ids[0]).expect("content"), before);
    }

    #[test]
    fn only_pages_with_locations_are_reported() {
        let mut fx = fixture(&["0 0 10 10 re f", "BT /F1 12 Tf 72 720 Td (Keep) Tj ET"]);
        let untouched = fx.doc.get_page_content(fx.page_ids[1]).expect("content");
        let report = redactor()
            .redact(&mut fx.doc, &[loc(0, 0.0, 0.0, 5.0, 5.0)])
            .expect("redact");
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].page_index, 0);
        assert_eq!(fx.doc.get_page_content(fx.page_ids[1]).expect("content"), untouched);
    }

    #[test]
    fn elapsed_timeout_fails_pages_without_touching_them() {
        let mut fx = fixture(&["0 0 10 10 re f"]);
        let before = fx.doc.get_page_content(fx.page_ids[0]).expect("content");
        let redactor = Redactor::builder()
            .workers(1)
            .timeout(Duration::ZERO)
            .build()
            .expect("redactor");
        let report = redactor
            .redact(&mut fx.doc, &[loc(0, 0.0, 0.0, 5.0, 5.0)])
            .expect("redact");
        assert_eq!(report.failed_pages().count(), 1);
        assert_eq!(fx.doc.get_page_content(fx.page_ids[0]).expect("content"), before);
    }

    #[test]
    fn cancelled_run_reports_failed_pages() {
        let mut fx = fixture(&["0 0 10 10 re f", "0 0 10 10 re f"]);
        let flag = Arc::new(AtomicBool::new(false));
        flag.store(true, Ordering::Relaxed);
        let redactor = Redactor::builder().cancel_flag(flag).build().expect("redactor");
        let report = redactor
            .redact(
                &mut fx.doc,
                &[loc(0, 0.0, 0.0, 5.0, 5.0), loc(1, 0.0, 0.0, 5.0, 5.0)],
            )
            .expect("redact");
        assert_eq!(report.failed_pages().count(), 2);
        assert!(report.pages.iter().all(|p| matches!(
            &p.outcome,
            PageOutcome::Failed { reason } if reason.contains("cancelled")
        )));
    }

    #[test]
    fn out_of_range_page_is_rejected() {
        let mut fx = fixture(&["0 0 10 10 re f"]);
        let err = redactor()
            .redact(&mut fx.doc, &[loc(3, 0.0, 0.0, 5.0, 5.0)])
            .expect_err("invalid");
        assert!(matches!(err, RedactError::InvalidLocation(_)));
    }

    #[test]
    fn builder_rejects_invalid_settings() {
        assert!(matches!(
            Redactor::builder().workers(0).build(),
            Err(RedactError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            Redactor::builder().flatten_tolerance(f32::NAN).build(),
            Err(RedactError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn bytes_round_trip_through_lopdf() {
        let mut fx = fixture(&["BT /F1 12 Tf 72 720 Td (Secret) Tj ET"]);
        let mut input = Vec::new();
        fx.doc.save_to(&mut input).expect("save");
        let (output, report) = redactor()
            .redact_pdf_bytes(&input, &[loc(0, 60.0, 700.0, 200.0, 40.0)])
            .expect("redact");
        assert_eq!(report.totals().glyphs_dropped, 6);
        let doc = LoDocument::load_mem(&output).expect("reload");
        let page_id = doc.get_pages().values().copied().next().expect("page");
        let ops = page_ops(&doc, page_id);
        assert!(ops.iter().all(|o| o.operands.iter().all(|v| match v {
            LoObject::Array(items) => !items.iter().any(|i| matches!(i, LoObject::String(..))),
            LoObject::String(..) => false,
            _ => true,
        })));
    }
}
