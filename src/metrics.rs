use std::ops::AddAssign;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetrics {
    pub operators_in: usize,
    pub operators_out: usize,
    pub paths_clipped: usize,
    pub paths_dropped: usize,
    pub text_operators_rewritten: usize,
    pub glyphs_dropped: usize,
    pub images_redacted: usize,
    pub images_dropped: usize,
    pub inline_images_dropped: usize,
    pub forms_rewritten: usize,
    pub shadings_clipped: usize,
    pub overpaints: usize,
    pub annotations_removed: usize,
}

impl PageMetrics {
    /// True when any content was removed or rewritten.
    pub fn changed_content(&self) -> bool {
        self.paths_clipped
            + self.paths_dropped
            + self.text_operators_rewritten
            + self.images_redacted
            + self.images_dropped
            + self.inline_images_dropped
            + self.forms_rewritten
            + self.shadings_clipped
            > 0
    }
}

impl AddAssign<&PageMetrics> for PageMetrics {
    fn add_assign(&mut self, other: &PageMetrics) {
        self.operators_in += other.operators_in;
        self.operators_out += other.operators_out;
        self.paths_clipped += other.paths_clipped;
        self.paths_dropped += other.paths_dropped;
        self.text_operators_rewritten += other.text_operators_rewritten;
        self.glyphs_dropped += other.glyphs_dropped;
        self.images_redacted += other.images_redacted;
        self.images_dropped += other.images_dropped;
        self.inline_images_dropped += other.inline_images_dropped;
        self.forms_rewritten += other.forms_rewritten;
        self.shadings_clipped += other.shadings_clipped;
        self.overpaints += other.overpaints;
        self.annotations_removed += other.annotations_removed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Redacted,
    /// Regions were overpainted because the content could not be rewritten
    /// operator by operator.
    FallbackApplied { reason: String },
    /// The page was left untouched.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct PageReport {
    pub page_index: usize,
    pub outcome: PageOutcome,
    pub metrics: PageMetrics,
    /// Some glyph positions came from estimated font widths.
    pub metrics_estimated: bool,
    /// Hex SHA-256 of the rewritten, unfiltered content stream.
    pub content_sha256: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RedactionReport {
    pub pages: Vec<PageReport>,
}

impl RedactionReport {
    pub fn page(&self, page_index: usize) -> Option<&PageReport> {
        self.pages.iter().find(|p| p.page_index == page_index)
    }

    pub fn fallback_pages(&self) -> impl Iterator<Item = &PageReport> {
        self.pages
            .iter()
            .filter(|p| matches!(p.outcome, PageOutcome::FallbackApplied { .. }))
    }

    pub fn failed_pages(&self) -> impl Iterator<Item = &PageReport> {
        self.pages
            .iter()
            .filter(|p| matches!(p.outcome, PageOutcome::Failed { .. }))
    }

    pub fn totals(&self) -> PageMetrics {
        let mut total = PageMetrics::default();
        for page in &self.pages {
            total += &page.metrics;
        }
        total
    }
}
