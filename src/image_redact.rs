use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, Stream, dictionary};
use tracing::trace;

use crate::error::RedactError;
use crate::flate::flate_stream;
use crate::geometry::{BBox, HalfPlane, Matrix, Point, clip_convex, signed_area};
use crate::object::{
    dict_bool, dict_get, name_bytes_to_string, resolve_object, resolved_obj_to_f64, stream_filters,
};
use crate::region::RegionIndex;
use crate::resources::{ImageXObject, MaskSource};

const UNSUPPORTED_FILTERS: [&str; 3] = ["JPXDecode", "JBIG2Decode", "CCITTFaxDecode"];

/// Sample layout of an image XObject, soft mask or stencil.
#[derive(Clone, Debug)]
pub(crate) struct ImageInfo {
    pub width: usize,
    pub height: usize,
    pub components: usize,
    pub bits_per_component: usize,
    pub image_mask: bool,
    /// `/Decode [1 0]` on a single-component mask.
    pub decode_inverted: bool,
    pub filters: Vec<String>,
}

impl ImageInfo {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

pub(crate) fn image_info(doc: &LoDocument, dict: &LoDictionary) -> Result<ImageInfo, String> {
    let dimension = |key: &[u8]| -> Result<usize, String> {
        let value = dict_get(doc, dict, key)
            .and_then(|o| resolved_obj_to_f64(doc, o))
            .ok_or_else(|| format!("missing /{}", String::from_utf8_lossy(key)))?;
        if value < 1.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
            return Err(format!("bad /{} {value}", String::from_utf8_lossy(key)));
        }
        Ok(value as usize)
    };
    let width = dimension(b"Width")?;
    let height = dimension(b"Height")?;
    let filters = stream_filters(doc, dict);
    if let Some(filter) = filters.iter().find(|f| UNSUPPORTED_FILTERS.contains(&f.as_str())) {
        return Err(format!("{filter} images are not supported"));
    }

    let image_mask = dict_bool(doc, dict, b"ImageMask").unwrap_or(false);
    let (components, bits_per_component) = if image_mask {
        (1, 1)
    } else {
        let color_space = dict_get(doc, dict, b"ColorSpace").ok_or("missing /ColorSpace")?;
        let components = color_space_components(doc, color_space)?;
        let bpc = dict_get(doc, dict, b"BitsPerComponent")
            .and_then(|o| resolved_obj_to_f64(doc, o))
            .map(|v| v as usize)
            .unwrap_or(8);
        if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
            return Err(format!("unsupported /BitsPerComponent {bpc}"));
        }
        (components, bpc)
    };

    let decode: Vec<f64> = dict_get(doc, dict, b"Decode")
        .and_then(|o| o.as_array().ok())
        .map(|arr| arr.iter().filter_map(|o| resolved_obj_to_f64(doc, o)).collect())
        .unwrap_or_default();
    let decode_inverted = decode.len() >= 2 && decode[0] > decode[1];

    Ok(ImageInfo {
        width,
        height,
        components,
        bits_per_component,
        image_mask,
        decode_inverted,
        filters,
    })
}

fn color_space_components(doc: &LoDocument, obj: &LoObject) -> Result<usize, String> {
    let obj = resolve_object(doc, obj).map_err(|e| e.to_string())?;
    match obj {
        LoObject::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" | b"Indexed" | b"I" => Ok(1),
            b"DeviceRGB" | b"CalRGB" | b"RGB" | b"Lab" => Ok(3),
            b"DeviceCMYK" | b"CMYK" => Ok(4),
            other => Err(format!("color space /{}", name_bytes_to_string(other))),
        },
        LoObject::Array(items) => {
            let family = items
                .first()
                .and_then(|o| resolve_object(doc, o).ok())
                .and_then(|o| o.as_name().ok())
                .ok_or("color space array without family")?;
            match family {
                b"ICCBased" => {
                    let n = items
                        .get(1)
                        .and_then(|o| resolve_object(doc, o).ok())
                        .and_then(|o| o.as_stream().ok())
                        .and_then(|s| dict_get(doc, &s.dict, b"N"))
                        .and_then(|o| resolved_obj_to_f64(doc, o))
                        .ok_or("ICCBased without /N")?;
                    Ok(n as usize)
                }
                b"Indexed" | b"I" | b"Separation" => Ok(1),
                b"DeviceN" => items
                    .get(1)
                    .and_then(|o| resolve_object(doc, o).ok())
                    .and_then(|o| o.as_array().ok())
                    .map(|names| names.len())
                    .filter(|&n| n > 0)
                    .ok_or_else(|| "DeviceN without colorants".to_string()),
                _ => color_space_components(doc, &LoObject::Name(family.to_vec())),
            }
        }
        _ => Err("unreadable color space".to_string()),
    }
}

/// Packed sample buffer addressed by pixel and component.
pub(crate) struct Raster {
    data: Vec<u8>,
    components: usize,
    bpc: usize,
    stride: usize,
}

impl Raster {
    pub fn new(data: Vec<u8>, info: &ImageInfo) -> Result<Self, String> {
        let stride = (info.width * info.components * info.bits_per_component).div_ceil(8);
        let needed = stride * info.height;
        if data.len() < needed {
            return Err(format!("expected {needed} sample bytes, found {}", data.len()));
        }
        Ok(Self {
            data,
            components: info.components,
            bpc: info.bits_per_component,
            stride,
        })
    }

    pub fn max_value(&self) -> u32 {
        (1u32 << self.bpc) - 1
    }

    fn bit_offset(&self, x: usize, y: usize, c: usize) -> usize {
        y * self.stride * 8 + (x * self.components + c) * self.bpc
    }

    pub fn get(&self, x: usize, y: usize, c: usize) -> u32 {
        let bit = self.bit_offset(x, y, c);
        let byte = bit / 8;
        match self.bpc {
            8 => self.data[byte] as u32,
            16 => u16::from_be_bytes([self.data[byte], self.data[byte + 1]]) as u32,
            bpc => {
                let shift = 8 - bpc - bit % 8;
                ((self.data[byte] >> shift) as u32) & self.max_value()
            }
        }
    }

    pub fn set(&mut self, x: usize, y: usize, c: usize, value: u32) {
        let bit = self.bit_offset(x, y, c);
        let byte = bit / 8;
        let value = value.min(self.max_value());
        match self.bpc {
            8 => self.data[byte] = value as u8,
            16 => {
                let [hi, lo] = (value as u16).to_be_bytes();
                self.data[byte] = hi;
                self.data[byte + 1] = lo;
            }
            bpc => {
                let shift = 8 - bpc - bit % 8;
                let mask = (self.max_value() as u8) << shift;
                self.data[byte] = (self.data[byte] & !mask) | ((value as u8) << shift);
            }
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Pixels of an image grid that share positive area with any region.
pub(crate) struct CoverageMask {
    width: usize,
    height: usize,
    bits: Vec<bool>,
    covered: usize,
}

impl CoverageMask {
    #[cfg(test)]
    pub fn is_covered(&self, x: usize, y: usize) -> bool {
        self.bits[y * self.width + x]
    }

    pub fn covered(&self) -> usize {
        self.covered
    }

    pub fn is_full(&self) -> bool {
        self.covered == self.width * self.height
    }

    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, covered)| **covered)
            .map(|(i, _)| (i % self.width, i / self.width))
    }
}

/// Maps each device-space region into the image's pixel grid and marks the
/// pixels it touches with positive area.
pub(crate) fn coverage_mask(ctm: Matrix, width: usize, height: usize, regions: &[BBox]) -> CoverageMask {
    let mut mask = CoverageMask {
        width,
        height,
        bits: vec![false; width * height],
        covered: 0,
    };
    let Some(device_to_unit) = ctm.inverse() else {
        return mask;
    };
    let (w, h) = (width as f64, height as f64);
    let device_to_pixel = device_to_unit.concat(Matrix::from_operands(w, 0.0, 0.0, -h, 0.0, h));

    for region in regions {
        let polygon: Vec<Point> = region
            .to_contour()
            .into_iter()
            .map(|p| device_to_pixel.transform_point(p.x, p.y))
            .collect();
        let extent = BBox::of_points(&polygon);
        let row_start = (extent.y0 + 1e-6).floor().max(0.0) as usize;
        let row_end = ((extent.y1 - 1e-6).ceil().min(h)).max(0.0) as usize;
        for row in row_start..row_end {
            let y = row as f64;
            let band = clip_convex(&polygon, &[HalfPlane::above(y), HalfPlane::below(y + 1.0)]);
            if band.len() < 3 || signed_area(&band).abs() <= 1e-12 {
                continue;
            }
            let span = BBox::of_points(&band);
            let col_start = (span.x0 + 1e-6).floor().max(0.0) as usize;
            let col_end = ((span.x1 - 1e-6).ceil().min(w)).max(0.0) as usize;
            for col in col_start..col_end {
                let bit = &mut mask.bits[row * width + col];
                if !*bit {
                    *bit = true;
                    mask.covered += 1;
                }
            }
        }
    }
    mask
}

/// New objects for a partially covered image. `smask`, when present, must be
/// added to the document and referenced from `image`'s `/SMask`.
#[derive(Debug)]
pub(crate) struct ImageRewrite {
    pub image: Stream,
    pub smask: Option<Stream>,
}

#[derive(Debug)]
pub(crate) enum ImageOutcome {
    Unchanged,
    Dropped,
    Rewritten(ImageRewrite),
}

/// Makes the covered part of an image transparent, leaving the rest intact.
pub(crate) fn redact_image(
    image: &ImageXObject,
    ctm: Matrix,
    regions: &RegionIndex,
    scrub: bool,
) -> Result<ImageOutcome, RedactError> {
    if !regions.overlaps_contour(&ctm.unit_square()) {
        return Ok(ImageOutcome::Unchanged);
    }
    let object = format!("{} {} R", image.id.0, image.id.1);
    let decode_error = |reason: String| RedactError::ImageDecode {
        object: object.clone(),
        reason,
    };
    let info = image.info.clone().map_err(decode_error)?;

    let coverage = coverage_mask(ctm, info.width, info.height, regions.rects());
    if coverage.covered() == 0 {
        return Ok(ImageOutcome::Unchanged);
    }
    if coverage.is_full() {
        return Ok(ImageOutcome::Dropped);
    }
    trace!(object = %object, covered = coverage.covered(), "partial image coverage");

    if info.image_mask {
        return redact_stencil(image, &info, &coverage).map_err(decode_error);
    }

    let needs_samples = scrub || matches!(image.mask, MaskSource::ColorKey(_));
    let mut samples = if needs_samples {
        Some(Raster::new(decode_samples(&image.stream, &info)?, &info).map_err(decode_error)?)
    } else {
        None
    };

    let mut alpha_changed = false;
    let smask = match &image.smask {
        Some((stream, smask_info)) => {
            let smask_info = smask_info.clone().map_err(decode_error)?;
            let mut alpha = Raster::new(decode_samples(stream, &smask_info)?, &smask_info)
                .map_err(decode_error)?;
            let clear = if smask_info.decode_inverted {
                alpha.max_value()
            } else {
                0
            };
            let smask_coverage = coverage_mask(ctm, smask_info.width, smask_info.height, regions.rects());
            for (x, y) in smask_coverage.pixels() {
                if alpha.get(x, y, 0) != clear {
                    alpha.set(x, y, 0, clear);
                    alpha_changed = true;
                }
            }
            alpha_changed.then(|| (stream.dict.clone(), alpha.into_bytes()))
        }
        None => {
            let mut alpha = base_alpha(image, &info, samples.as_ref()).map_err(decode_error)?;
            for (x, y) in coverage.pixels() {
                let slot = &mut alpha[y * info.width + x];
                if *slot != 0 {
                    *slot = 0;
                    alpha_changed = true;
                }
            }
            alpha_changed.then(|| {
                let dict = dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => info.width as i64,
                    "Height" => info.height as i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                };
                (dict, alpha)
            })
        }
    };

    let mut samples_changed = false;
    if let Some(raster) = samples.as_mut().filter(|_| scrub) {
        for (x, y) in coverage.pixels() {
            for c in 0..info.components {
                if raster.get(x, y, c) != 0 {
                    raster.set(x, y, c, 0);
                    samples_changed = true;
                }
            }
        }
    }

    if !alpha_changed && !samples_changed {
        return Ok(ImageOutcome::Unchanged);
    }

    let mut image_stream = if samples_changed {
        let mut dict = image.stream.dict.clone();
        if info.filters.iter().any(|f| f == "DCTDecode") {
            dict.set("BitsPerComponent", 8);
            dict.remove(b"Decode");
        }
        let raster = samples.take().map(Raster::into_bytes).unwrap_or_default();
        flate_stream(dict, &raster)?
    } else {
        image.stream.clone()
    };
    let smask = match smask {
        Some((dict, alpha)) => {
            if image.smask.is_none() {
                image_stream.dict.remove(b"Mask");
            }
            Some(flate_stream(dict, &alpha)?)
        }
        None => None,
    };
    Ok(ImageOutcome::Rewritten(ImageRewrite {
        image: image_stream,
        smask,
    }))
}

fn redact_stencil(
    image: &ImageXObject,
    info: &ImageInfo,
    coverage: &CoverageMask,
) -> Result<ImageOutcome, String> {
    let data = decode_samples(&image.stream, info).map_err(|e| e.to_string())?;
    let mut raster = Raster::new(data, info)?;
    let unpainted = if info.decode_inverted { 0 } else { 1 };
    let mut changed = false;
    for (x, y) in coverage.pixels() {
        if raster.get(x, y, 0) != unpainted {
            raster.set(x, y, 0, unpainted);
            changed = true;
        }
    }
    if !changed {
        return Ok(ImageOutcome::Unchanged);
    }
    let stream = flate_stream(image.stream.dict.clone(), &raster.into_bytes()).map_err(|e| e.to_string())?;
    Ok(ImageOutcome::Rewritten(ImageRewrite {
        image: stream,
        smask: None,
    }))
}

/// Opacity implied by the image's existing `/Mask`, one byte per pixel.
fn base_alpha(image: &ImageXObject, info: &ImageInfo, samples: Option<&Raster>) -> Result<Vec<u8>, String> {
    let mut alpha = vec![255u8; info.pixel_count()];
    match &image.mask {
        MaskSource::None => {}
        MaskSource::Stencil { stream, info: mask_info } => {
            let data = decode_samples(stream, mask_info).map_err(|e| e.to_string())?;
            let mask = Raster::new(data, mask_info)?;
            // Sample value 1 masks the image out unless /Decode inverts it.
            let masked_value = if mask_info.decode_inverted { 0 } else { 1 };
            for y in 0..info.height {
                let my = y * mask_info.height / info.height;
                for x in 0..info.width {
                    let mx = x * mask_info.width / info.width;
                    if mask.get(mx, my, 0) == masked_value {
                        alpha[y * info.width + x] = 0;
                    }
                }
            }
        }
        MaskSource::ColorKey(ranges) => {
            let Some(raster) = samples else {
                return Err("color key mask without samples".to_string());
            };
            if ranges.len() >= info.components {
                for y in 0..info.height {
                    for x in 0..info.width {
                        let keyed = (0..info.components).all(|c| {
                            let v = raster.get(x, y, c);
                            v >= ranges[c].0 && v <= ranges[c].1
                        });
                        if keyed {
                            alpha[y * info.width + x] = 0;
                        }
                    }
                }
            }
        }
    }
    Ok(alpha)
}

/// Unfiltered samples of an image stream.
fn decode_samples(stream: &Stream, info: &ImageInfo) -> Result<Vec<u8>, RedactError> {
    let decode_error = |reason: String| RedactError::ImageDecode {
        object: dict_name_hint(&stream.dict),
        reason,
    };
    match info.filters.iter().position(|f| f == "DCTDecode") {
        Some(0) if info.filters.len() == 1 => decode_dct(&stream.content, info).map_err(decode_error),
        Some(_) => Err(decode_error("DCTDecode behind other filters".to_string())),
        None => stream
            .get_plain_content()
            .map_err(|e| decode_error(e.to_string())),
    }
}

fn decode_dct(bytes: &[u8], info: &ImageInfo) -> Result<Vec<u8>, String> {
    let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .map_err(|e| e.to_string())?;
    if decoded.width() as usize != info.width || decoded.height() as usize != info.height {
        return Err("JPEG dimensions disagree with the image dictionary".to_string());
    }
    match info.components {
        1 => Ok(decoded.to_luma8().into_raw()),
        3 => Ok(decoded.to_rgb8().into_raw()),
        n => Err(format!("{n}-component JPEG")),
    }
}

fn dict_name_hint(dict: &LoDictionary) -> String {
    match dict.get(b"Subtype").and_then(LoObject::as_name) {
        Ok(name) => format!("/{}", name_bytes_to_string(name)),
        Err(_) => "image".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rect, RedactionLocation};

    fn gray_image(width: usize, height: usize, fill: u8) -> (LoDocument, ImageXObject) {
        let doc = LoDocument::with_version("1.5");
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![fill; width * height],
        );
        let info = image_info(&doc, &stream.dict);
        let image = ImageXObject {
            id: (9, 0),
            stream,
            info,
            smask: None,
            mask: MaskSource::None,
        };
        (doc, image)
    }

    fn regions(x: f32, y: f32, w: f32, h: f32) -> RegionIndex {
        RegionIndex::new(&[RedactionLocation::new(0, Rect::new(x, y, w, h))])
    }

    #[test]
    fn info_reads_color_space_families() {
        let doc = LoDocument::with_version("1.5");
        let dict = dictionary! {
            "Width" => 4, "Height" => 2, "BitsPerComponent" => 4,
            "ColorSpace" => vec![
                LoObject::Name(b"Indexed".to_vec()),
                LoObject::Name(b"DeviceRGB".to_vec()),
                3.into(),
                LoObject::string_literal("abcdefghijkl"),
            ],
        };
        let info = image_info(&doc, &dict).expect("info");
        assert_eq!((info.width, info.height, info.components, info.bits_per_component), (4, 2, 1, 4));

        let jpx = dictionary! {
            "Width" => 4, "Height" => 2, "Filter" => "JPXDecode",
        };
        assert!(image_info(&doc, &jpx).is_err());
    }

    #[test]
    fn raster_addresses_packed_samples() {
        let info = ImageInfo {
            width: 3,
            height: 2,
            components: 1,
            bits_per_component: 4,
            image_mask: false,
            decode_inverted: false,
            filters: Vec::new(),
        };
        // Rows are padded to whole bytes: 3 nibbles take 2 bytes.
        let mut raster = Raster::new(vec![0x12, 0x30, 0x45, 0x60], &info).expect("raster");
        assert_eq!(raster.get(1, 0, 0), 2);
        assert_eq!(raster.get(0, 1, 0), 4);
        raster.set(2, 1, 0, 0xf);
        assert_eq!(raster.into_bytes(), vec![0x12, 0x30, 0x45, 0xf0]);

        let wide = ImageInfo {
            bits_per_component: 16,
            width: 1,
            height: 1,
            ..info
        };
        let mut raster = Raster::new(vec![0x01, 0x02], &wide).expect("raster");
        assert_eq!(raster.get(0, 0, 0), 0x0102);
        raster.set(0, 0, 0, 0xbeef);
        assert_eq!(raster.into_bytes(), vec![0xbe, 0xef]);
    }

    #[test]
    fn coverage_follows_image_orientation() {
        // 10x10 image drawn into a 100pt square; the region covers the top half.
        let ctm = Matrix::from_operands(100.0, 0.0, 0.0, 100.0, 0.0, 0.0);
        let mask = coverage_mask(ctm, 10, 10, &[BBox::new(0.0, 50.0, 100.0, 100.0)]);
        assert_eq!(mask.covered(), 50);
        assert!(mask.is_covered(0, 0));
        assert!(mask.is_covered(9, 4));
        assert!(!mask.is_covered(0, 5));
    }

    #[test]
    fn coverage_counts_partially_touched_pixels() {
        let ctm = Matrix::from_operands(100.0, 0.0, 0.0, 100.0, 0.0, 0.0);
        let mask = coverage_mask(ctm, 10, 10, &[BBox::new(15.0, 15.0, 25.0, 25.0)]);
        // Columns 1..3 and rows 7..9 are each touched.
        assert_eq!(mask.covered(), 4);
        assert!(mask.is_covered(1, 7) && mask.is_covered(2, 8));
    }

    #[test]
    fn image_outside_regions_is_unchanged() {
        let (_, image) = gray_image(4, 4, 200);
        let ctm = Matrix::from_operands(40.0, 0.0, 0.0, 40.0, 300.0, 300.0);
        let outcome = redact_image(&image, ctm, &regions(0.0, 0.0, 100.0, 100.0), true).expect("redact");
        assert!(matches!(outcome, ImageOutcome::Unchanged));
    }

    #[test]
    fn fully_covered_image_is_dropped() {
        let (_, image) = gray_image(4, 4, 200);
        let ctm = Matrix::from_operands(40.0, 0.0, 0.0, 40.0, 10.0, 10.0);
        let outcome = redact_image(&image, ctm, &regions(0.0, 0.0, 100.0, 100.0), true).expect("redact");
        assert!(matches!(outcome, ImageOutcome::Dropped));
    }

    #[test]
    fn partial_coverage_masks_and_scrubs_covered_pixels() {
        let (doc, image) = gray_image(4, 4, 200);
        let ctm = Matrix::from_operands(40.0, 0.0, 0.0, 40.0, 0.0, 0.0);
        // Left half of the image.
        let outcome = redact_image(&image, ctm, &regions(0.0, 0.0, 20.0, 40.0), true).expect("redact");
        let ImageOutcome::Rewritten(rewrite) = outcome else {
            panic!("expected rewrite");
        };
        let smask = rewrite.smask.expect("soft mask");
        let alpha = smask.decompressed_content().expect("alpha");
        assert_eq!(&alpha[0..4], &[0, 0, 255, 255]);
        assert_eq!(alpha.iter().filter(|a| **a == 0).count(), 8);
        let samples = rewrite.image.decompressed_content().expect("samples");
        assert_eq!(&samples[0..4], &[0, 0, 200, 200]);
        let smask_info = image_info(&doc, &smask.dict).expect("smask info");
        assert_eq!((smask_info.width, smask_info.components), (4, 1));
    }

    #[test]
    fn redacting_twice_leaves_the_image_alone() {
        let (doc, image) = gray_image(4, 4, 200);
        let ctm = Matrix::from_operands(40.0, 0.0, 0.0, 40.0, 0.0, 0.0);
        let region = regions(0.0, 0.0, 20.0, 40.0);
        let ImageOutcome::Rewritten(rewrite) = redact_image(&image, ctm, &region, true).expect("redact")
        else {
            panic!("expected rewrite");
        };
        let smask = rewrite.smask.expect("soft mask");
        let second = ImageXObject {
            id: (10, 0),
            info: image_info(&doc, &rewrite.image.dict),
            stream: rewrite.image,
            smask: Some((smask.clone(), image_info(&doc, &smask.dict))),
            mask: MaskSource::None,
        };
        assert!(matches!(
            redact_image(&second, ctm, &region, true).expect("redact"),
            ImageOutcome::Unchanged
        ));
    }

    #[test]
    fn stencil_masks_stop_painting_covered_samples() {
        let doc = LoDocument::with_version("1.5");
        let stream = Stream::new(
            dictionary! { "Subtype" => "Image", "Width" => 8, "Height" => 1, "ImageMask" => true },
            vec![0x00],
        );
        let image = ImageXObject {
            id: (3, 0),
            info: image_info(&doc, &stream.dict),
            stream,
            smask: None,
            mask: MaskSource::None,
        };
        let ctm = Matrix::from_operands(80.0, 0.0, 0.0, 10.0, 0.0, 0.0);
        let ImageOutcome::Rewritten(rewrite) =
            redact_image(&image, ctm, &regions(0.0, 0.0, 20.0, 10.0), true).expect("redact")
        else {
            panic!("expected rewrite");
        };
        assert_eq!(rewrite.image.decompressed_content().expect("samples"), vec![0xc0]);
        assert!(rewrite.smask.is_none());
    }

    fn gray_row(samples: Vec<u8>, mask: MaskSource) -> ImageXObject {
        let doc = LoDocument::with_version("1.5");
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => samples.len() as i64,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Mask" => LoObject::Reference((5, 0)),
            },
            samples,
        );
        ImageXObject {
            id: (6, 0),
            info: image_info(&doc, &stream.dict),
            stream,
            smask: None,
            mask,
        }
    }

    fn folded_alpha(image: &ImageXObject) -> (Stream, Vec<u8>) {
        // Four pixels across 40pt; the region covers the right two.
        let ctm = Matrix::from_operands(40.0, 0.0, 0.0, 10.0, 0.0, 0.0);
        let region = regions(21.0, -5.0, 30.0, 20.0);
        let ImageOutcome::Rewritten(rewrite) = redact_image(image, ctm, &region, false).expect("redact")
        else {
            panic!("expected rewrite");
        };
        let smask = rewrite.smask.expect("soft mask");
        let alpha = smask.decompressed_content().expect("alpha");
        (rewrite.image, alpha)
    }

    #[test]
    fn stencil_mask_is_folded_into_the_new_soft_mask() {
        let doc = LoDocument::with_version("1.5");
        let mask_stream = Stream::new(
            dictionary! { "Subtype" => "Image", "Width" => 4, "Height" => 1, "ImageMask" => true },
            // Pixel 1 is masked out.
            vec![0b0100_0000],
        );
        let mask_info = image_info(&doc, &mask_stream.dict).expect("mask info");
        let image = gray_row(
            vec![200; 4],
            MaskSource::Stencil {
                stream: mask_stream,
                info: mask_info,
            },
        );
        let (rewritten, alpha) = folded_alpha(&image);
        assert_eq!(alpha, vec![255, 0, 0, 0]);
        assert!(rewritten.dict.get(b"Mask").is_err());
        assert_eq!(rewritten.content, vec![200; 4]);
    }

    #[test]
    fn color_key_mask_is_folded_into_the_new_soft_mask() {
        let image = gray_row(vec![10, 200, 10, 200], MaskSource::ColorKey(vec![(10, 10)]));
        let (rewritten, alpha) = folded_alpha(&image);
        assert_eq!(alpha, vec![0, 255, 0, 0]);
        assert!(rewritten.dict.get(b"Mask").is_err());
    }

    #[test]
    fn undecodable_overlapping_image_reports_decode_error() {
        let doc = LoDocument::with_version("1.5");
        let stream = Stream::new(
            dictionary! { "Subtype" => "Image", "Width" => 2, "Height" => 2, "Filter" => "JBIG2Decode" },
            vec![1, 2, 3],
        );
        let image = ImageXObject {
            id: (4, 0),
            info: image_info(&doc, &stream.dict),
            stream,
            smask: None,
            mask: MaskSource::None,
        };
        let ctm = Matrix::from_operands(40.0, 0.0, 0.0, 40.0, 0.0, 0.0);
        let err = redact_image(&image, ctm, &regions(0.0, 0.0, 10.0, 10.0), true).expect_err("decode");
        assert!(matches!(err, RedactError::ImageDecode { .. }));
    }
}
