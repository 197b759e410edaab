use std::collections::HashMap;
use std::ops::Range;

use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject};
use ttf_parser::Face;

use crate::object::{
    dict_f64, dict_get, dict_name, parse_box_object, parse_matrix_object,
    resolve_object, resolved_obj_to_f64, resolved_obj_to_u16,
};

// Used when a font carries no usable width information at all.
const NOMINAL_WIDTH: f64 = 500.0;
const UNKNOWN_WIDTH_HIGH: f64 = 1000.0;
// Slack applied around widths borrowed from a related standard face.
const BORROWED_LOW: f64 = 0.85;
const BORROWED_HIGH: f64 = 1.2;

// Helvetica (WinAnsi 32..=126), 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, 1015, 667, 667, 722, 722, 667,
    611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667,
    667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500,
    222, 833, 556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

// Times-Roman (WinAnsi 32..=126), 1/1000 em.
const TIMES_WIDTHS: [u16; 95] = [
    250, 333, 408, 500, 500, 833, 778, 333, 333, 333, 500, 564, 250, 333, 250, 278, 500, 500, 500,
    500, 500, 500, 500, 500, 500, 500, 278, 278, 564, 564, 564, 444, 921, 722, 667, 667, 722, 611,
    556, 722, 722, 333, 389, 722, 611, 889, 722, 722, 556, 722, 667, 556, 611, 722, 722, 944, 722,
    722, 611, 333, 278, 333, 469, 500, 333, 444, 500, 444, 500, 444, 333, 500, 500, 278, 278, 500,
    278, 778, 500, 500, 500, 500, 333, 389, 278, 500, 500, 722, 500, 500, 444, 480, 200, 480, 541,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) enum CodeWidth {
    #[default]
    SingleByte,
    TwoByteBigEndian,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WidthSource {
    /// Widths come from the font dictionary or its embedded program.
    Font,
    /// Widths borrowed from a standard face; treated as bounds.
    Borrowed,
    /// No widths known; every glyph gets the widest plausible interval.
    Missing,
}

/// Glyph advance in text-space units per unit font size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Advance {
    pub nominal: f64,
    pub low: f64,
    pub high: f64,
}

impl Advance {
    fn exact(width: f64) -> Self {
        Self {
            nominal: width,
            low: width,
            high: width,
        }
    }

    pub fn is_exact(&self) -> bool {
        (self.high - self.low).abs() < 1e-9
    }
}

/// Width and extent data for one font resource.
#[derive(Clone, Debug)]
pub(crate) struct FontMetrics {
    pub name: String,
    pub code_width: CodeWidth,
    pub vertical: bool,
    widths: HashMap<u16, f64>,
    default_width: f64,
    source: WidthSource,
    // Glyph units to text space.
    scale: f64,
    // Vertical glyph extent in glyph units.
    descent: f64,
    ascent: f64,
}

impl FontMetrics {
    /// Metrics for a text-showing operator with no usable font.
    pub fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            code_width: CodeWidth::SingleByte,
            vertical: false,
            widths: HashMap::new(),
            default_width: NOMINAL_WIDTH,
            source: WidthSource::Missing,
            scale: 0.001,
            descent: -300.0,
            ascent: 1100.0,
        }
    }

    pub fn source(&self) -> WidthSource {
        self.source
    }

    pub fn advance(&self, code: u16) -> Advance {
        let scale = self.scale.abs();
        match self.source {
            WidthSource::Font => {
                let width = self.widths.get(&code).copied().unwrap_or(self.default_width);
                Advance::exact(width * scale)
            }
            WidthSource::Borrowed => match self.widths.get(&code) {
                Some(width) => Advance {
                    nominal: width * scale,
                    low: width * BORROWED_LOW * scale,
                    high: width * BORROWED_HIGH * scale,
                },
                None => self.missing_advance(),
            },
            WidthSource::Missing => self.missing_advance(),
        }
    }

    fn missing_advance(&self) -> Advance {
        let scale = self.scale.abs();
        Advance {
            nominal: self.default_width * scale,
            low: 0.0,
            high: UNKNOWN_WIDTH_HIGH.max(self.default_width) * scale,
        }
    }

    /// Vertical glyph extent in text space per unit font size, bottom first.
    pub fn vertical_extent(&self) -> (f64, f64) {
        let a = self.descent * self.scale;
        let b = self.ascent * self.scale;
        (a.min(b), a.max(b))
    }

    /// Splits a string operand into character codes with their byte ranges.
    pub fn codes(&self, bytes: &[u8]) -> Vec<(u16, Range<usize>)> {
        match self.code_width {
            CodeWidth::SingleByte => bytes
                .iter()
                .enumerate()
                .map(|(i, b)| (*b as u16, i..i + 1))
                .collect(),
            CodeWidth::TwoByteBigEndian => bytes
                .chunks_exact(2)
                .enumerate()
                .map(|(i, pair)| (u16::from_be_bytes([pair[0], pair[1]]), i * 2..i * 2 + 2))
                .collect(),
        }
    }

    /// Word spacing applies to the single-byte code 32 only.
    pub fn is_word_space(&self, code: u16, range: &Range<usize>) -> bool {
        code == 32 && range.len() == 1
    }
}

pub(crate) fn parse_font_metrics(doc: &LoDocument, font_dict: &LoDictionary) -> FontMetrics {
    let base_font = dict_name(doc, font_dict, b"BaseFont")
        .map(|name| normalize_pdf_font_name(&name))
        .unwrap_or_default();
    let subtype = dict_name(doc, font_dict, b"Subtype").unwrap_or_default();
    let mut metrics = match subtype.as_str() {
        "Type0" => parse_type0_font_metrics(doc, font_dict),
        "Type3" => parse_type3_font_metrics(doc, font_dict),
        _ => parse_simple_font_metrics(doc, font_dict, &base_font),
    };
    metrics.name = if base_font.is_empty() {
        subtype
    } else {
        base_font
    };
    metrics
}

fn parse_type0_font_metrics(doc: &LoDocument, font_dict: &LoDictionary) -> FontMetrics {
    let mut out = FontMetrics::unknown("");
    let encoding = dict_name(doc, font_dict, b"Encoding").unwrap_or_default();
    let identity = encoding == "Identity-H" || encoding == "Identity-V";
    out.vertical = encoding.ends_with("-V");
    // Non-identity CMaps may mix code lengths; two bytes is the common case.
    out.code_width = CodeWidth::TwoByteBigEndian;

    let Some(descendant) = dict_get(doc, font_dict, b"DescendantFonts")
        .and_then(|o| o.as_array().ok())
        .and_then(|arr| arr.first())
        .and_then(|o| resolve_object(doc, o).ok())
        .and_then(|o| o.as_dict().ok())
    else {
        return out;
    };

    out.default_width = dict_f64(doc, descendant, b"DW").unwrap_or(1000.0).max(0.0);
    if let Ok(w_obj) = descendant.get(b"W") {
        out.widths = parse_cid_font_widths(doc, w_obj);
    }
    out.source = if identity {
        WidthSource::Font
    } else {
        WidthSource::Missing
    };
    if let Some(descriptor) = dict_get(doc, descendant, b"FontDescriptor")
        .and_then(|o| o.as_dict().ok())
    {
        apply_descriptor_extent(doc, descriptor, &mut out);
        let gid_identity = match dict_get(doc, descendant, b"CIDToGIDMap") {
            None => true,
            Some(LoObject::Name(name)) => name.as_slice() == b"Identity",
            Some(_) => false,
        };
        if identity && gid_identity && descendant.get(b"W").is_err() {
            apply_embedded_program(doc, descriptor, &mut out);
        }
    }
    out
}

fn parse_simple_font_metrics(
    doc: &LoDocument,
    font_dict: &LoDictionary,
    base_font: &str,
) -> FontMetrics {
    let mut out = FontMetrics::unknown("");
    let descriptor = dict_get(doc, font_dict, b"FontDescriptor").and_then(|o| o.as_dict().ok());
    if let Some(descriptor) = descriptor {
        if let Some(missing) = dict_f64(doc, descriptor, b"MissingWidth") {
            out.default_width = missing.max(0.0);
        }
        apply_descriptor_extent(doc, descriptor, &mut out);
    }

    let first_char = font_dict
        .get(b"FirstChar")
        .ok()
        .and_then(|obj| resolved_obj_to_u16(doc, obj))
        .unwrap_or(0u16);
    if let Some(width_arr) = dict_get(doc, font_dict, b"Widths").and_then(|o| o.as_array().ok()) {
        for (idx, width_obj) in width_arr.iter().enumerate() {
            let Some(width) = resolved_obj_to_f64(doc, width_obj) else {
                continue;
            };
            let Ok(offset) = u16::try_from(idx) else {
                break;
            };
            let Some(code) = first_char.checked_add(offset) else {
                break;
            };
            out.widths.insert(code, width.max(0.0));
        }
        out.source = WidthSource::Font;
        return out;
    }

    if let Some((table, exact)) = builtin_widths(base_font) {
        out.widths = table;
        out.source = if exact {
            WidthSource::Font
        } else {
            WidthSource::Borrowed
        };
        if descriptor.is_none() {
            out.descent = -250.0;
            out.ascent = 950.0;
        }
    }
    out
}

fn parse_type3_font_metrics(doc: &LoDocument, font_dict: &LoDictionary) -> FontMetrics {
    let mut out = parse_simple_font_metrics(doc, font_dict, "");
    let matrix = font_dict
        .get(b"FontMatrix")
        .ok()
        .and_then(|o| parse_matrix_object(doc, o));
    if let Some(matrix) = matrix {
        out.scale = matrix.a;
        if let Some(bbox) = font_dict
            .get(b"FontBBox")
            .ok()
            .and_then(|o| parse_box_object(doc, o))
        {
            // Extents stay in glyph units; rescale them to the width scale.
            let y_scale = if matrix.a.abs() > 1e-12 {
                matrix.d / matrix.a
            } else {
                1.0
            };
            out.descent = bbox.y0 * y_scale;
            out.ascent = bbox.y1 * y_scale;
        }
    }
    out
}

fn apply_descriptor_extent(doc: &LoDocument, descriptor: &LoDictionary, out: &mut FontMetrics) {
    if let Some(bbox) = descriptor
        .get(b"FontBBox")
        .ok()
        .and_then(|o| parse_box_object(doc, o))
        .filter(|b| b.height() > 0.0)
    {
        out.descent = bbox.y0;
        out.ascent = bbox.y1;
        return;
    }
    let ascent = dict_f64(doc, descriptor, b"Ascent");
    let descent = dict_f64(doc, descriptor, b"Descent");
    if let (Some(ascent), Some(descent)) = (ascent, descent) {
        if ascent > descent {
            out.descent = descent;
            out.ascent = ascent;
        }
    }
}

// Identity-mapped CID fonts without /W: read advances from the font program.
fn apply_embedded_program(doc: &LoDocument, descriptor: &LoDictionary, out: &mut FontMetrics) {
    let Some(data) = font_descriptor_file_bytes(doc, descriptor) else {
        return;
    };
    let Ok(face) = Face::parse(&data, 0) else {
        return;
    };
    let upem = face.units_per_em().max(1) as f64;
    let scale = 1000.0 / upem;
    let mut widths = HashMap::new();
    for gid in 0..face.number_of_glyphs() {
        if let Some(adv) = face.glyph_hor_advance(ttf_parser::GlyphId(gid)) {
            widths.insert(gid, adv as f64 * scale);
        }
    }
    let bbox = face.global_bounding_box();
    out.descent = out.descent.min(bbox.y_min as f64 * scale);
    out.ascent = out.ascent.max(bbox.y_max as f64 * scale);
    if !widths.is_empty() {
        out.widths = widths;
        out.source = WidthSource::Font;
    }
}

fn parse_cid_font_widths(doc: &LoDocument, obj: &LoObject) -> HashMap<u16, f64> {
    let mut out = HashMap::new();
    let Some(width_items) = resolve_object(doc, obj)
        .ok()
        .and_then(|resolved| resolved.as_array().ok())
    else {
        return out;
    };

    let mut idx = 0usize;
    while idx < width_items.len() {
        let Some(start_cid) = resolved_obj_to_u16(doc, &width_items[idx]) else {
            idx += 1;
            continue;
        };
        let Some(next_obj) = width_items
            .get(idx + 1)
            .and_then(|o| resolve_object(doc, o).ok())
        else {
            break;
        };

        // `c [w1 w2 ...]`
        if let Ok(width_list) = next_obj.as_array() {
            for (offset, width_obj) in width_list.iter().enumerate() {
                let Some(width) = resolved_obj_to_f64(doc, width_obj) else {
                    continue;
                };
                let Some(code) = u16::try_from(offset)
                    .ok()
                    .and_then(|step| start_cid.checked_add(step))
                else {
                    break;
                };
                out.insert(code, width.max(0.0));
            }
            idx += 2;
            continue;
        }

        // `c_first c_last w`
        let Some(end_cid) = resolved_obj_to_u16(doc, next_obj) else {
            idx += 1;
            continue;
        };
        let Some(width) = width_items
            .get(idx + 2)
            .and_then(|o| resolved_obj_to_f64(doc, o))
        else {
            idx += 3;
            continue;
        };
        for code in start_cid..=end_cid {
            out.insert(code, width.max(0.0));
        }
        idx += 3;
    }
    out
}

fn font_descriptor_file_bytes(doc: &LoDocument, descriptor: &LoDictionary) -> Option<Vec<u8>> {
    for key in [b"FontFile2".as_slice(), b"FontFile3".as_slice()] {
        let Some(stream) = dict_get(doc, descriptor, key).and_then(|o| o.as_stream().ok()) else {
            continue;
        };
        if let Ok(data) = stream.get_plain_content() {
            if !data.is_empty() {
                return Some(data);
            }
        }
    }
    None
}

/// Standard-14 widths for faces a viewer would substitute; `true` when exact.
fn builtin_widths(base_font: &str) -> Option<(HashMap<u16, f64>, bool)> {
    let family = base_font.replace([',', ' '], "-");
    let (table, exact): (Vec<f64>, bool) = match family.as_str() {
        "Helvetica" | "Helvetica-Oblique" => (widen(&HELVETICA_WIDTHS), true),
        "Times-Roman" => (widen(&TIMES_WIDTHS), true),
        f if f.starts_with("Courier") => (vec![600.0; 95], true),
        f if f.starts_with("Helvetica") || f.starts_with("Arial") => {
            (widen(&HELVETICA_WIDTHS), false)
        }
        f if f.starts_with("Times") => (widen(&TIMES_WIDTHS), false),
        _ => return None,
    };
    let widths = table
        .into_iter()
        .enumerate()
        .map(|(i, w)| (32 + i as u16, w))
        .collect();
    Some((widths, exact))
}

fn widen(table: &[u16]) -> Vec<f64> {
    table.iter().map(|w| *w as f64).collect()
}

pub(crate) fn normalize_pdf_font_name(name: &str) -> String {
    let trimmed = name.trim().trim_start_matches('/');
    if let Some((prefix, rest)) = trimmed.split_once('+') {
        if prefix.len() == 6 && prefix.chars().all(|c| c.is_ascii_uppercase()) {
            return rest.to_string();
        }
    }
    trimmed.to_string()
}
