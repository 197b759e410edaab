use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, ObjectId, Stream};
use tracing::{debug, trace};

use crate::error::RedactError;
use crate::font::{FontMetrics, parse_font_metrics};
use crate::geometry::{BBox, Matrix};
use crate::image_redact::{ImageInfo, image_info};
use crate::object::{
    dict_get, dict_name, name_bytes_to_string, obj_to_f64, parse_box_object, parse_matrix_object,
    resolve_dict, resolve_object, resolved_obj_to_f64,
};

/// Line and font parameters an `ExtGState` can set.
#[derive(Clone, Debug, Default)]
pub(crate) struct ExtGState {
    pub line_width: Option<f64>,
    pub line_cap: Option<i64>,
    pub line_join: Option<i64>,
    pub miter_limit: Option<f64>,
    pub dash: Option<(Vec<f64>, f64)>,
    pub font: Option<(Arc<FontMetrics>, f64)>,
}

#[derive(Clone, Debug)]
pub(crate) enum MaskSource {
    None,
    Stencil { stream: Stream, info: ImageInfo },
    ColorKey(Vec<(u32, u32)>),
}

#[derive(Clone, Debug)]
pub(crate) struct ImageXObject {
    pub id: ObjectId,
    pub stream: Stream,
    pub info: Result<ImageInfo, String>,
    pub smask: Option<(Stream, Result<ImageInfo, String>)>,
    pub mask: MaskSource,
}

#[derive(Clone, Debug)]
pub(crate) struct FormXObject {
    pub id: ObjectId,
    pub stream: Stream,
    pub bbox: BBox,
    pub matrix: Matrix,
    pub resources: Arc<Resources>,
}

#[derive(Clone, Debug)]
pub(crate) enum XObject {
    Image(Arc<ImageXObject>),
    Form(Arc<FormXObject>),
    /// PostScript or unreadable XObjects.
    Opaque(String),
}

/// Read-only lookup of named resources for one content stream.
pub(crate) trait ResourceResolver: Send + Sync {
    fn font(&self, name: &[u8]) -> Option<Arc<FontMetrics>>;
    fn xobject(&self, name: &[u8]) -> Option<XObject>;
    fn ext_gstate(&self, name: &[u8]) -> Option<Arc<ExtGState>>;
    fn xobject_names(&self) -> HashSet<Vec<u8>>;
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Resources {
    fonts: HashMap<Vec<u8>, Arc<FontMetrics>>,
    xobjects: HashMap<Vec<u8>, XObject>,
    ext_gstates: HashMap<Vec<u8>, Arc<ExtGState>>,
}

impl Resources {
    #[cfg(test)]
    pub(crate) fn with_font(mut self, name: &str, metrics: FontMetrics) -> Self {
        self.fonts.insert(name.as_bytes().to_vec(), Arc::new(metrics));
        self
    }

    #[cfg(test)]
    pub(crate) fn with_xobject(mut self, name: &str, xobject: XObject) -> Self {
        self.xobjects.insert(name.as_bytes().to_vec(), xobject);
        self
    }
}

impl ResourceResolver for Resources {
    fn font(&self, name: &[u8]) -> Option<Arc<FontMetrics>> {
        self.fonts.get(name).cloned()
    }

    fn xobject(&self, name: &[u8]) -> Option<XObject> {
        self.xobjects.get(name).cloned()
    }

    fn ext_gstate(&self, name: &[u8]) -> Option<Arc<ExtGState>> {
        self.ext_gstates.get(name).cloned()
    }

    fn xobject_names(&self) -> HashSet<Vec<u8>> {
        self.xobjects.keys().cloned().collect()
    }
}

/// Everything a worker needs to rewrite one page without touching the document.
#[derive(Debug)]
pub(crate) struct PageSnapshot {
    pub page_index: usize,
    pub page_id: ObjectId,
    pub media_box: BBox,
    pub operations: Result<Vec<Operation>, String>,
    pub resources: Arc<Resources>,
}

/// Builds immutable resource snapshots, sharing parsed fonts and XObjects
/// across pages.
pub(crate) struct ResourceLoader<'a> {
    doc: &'a LoDocument,
    fonts: HashMap<ObjectId, Arc<FontMetrics>>,
    xobjects: HashMap<ObjectId, XObject>,
    visiting: HashSet<ObjectId>,
}

impl<'a> ResourceLoader<'a> {
    pub fn new(doc: &'a LoDocument) -> Self {
        Self {
            doc,
            fonts: HashMap::new(),
            xobjects: HashMap::new(),
            visiting: HashSet::new(),
        }
    }

    pub fn page(&mut self, page_index: usize, page_id: ObjectId) -> Result<PageSnapshot, RedactError> {
        let doc = self.doc;
        let resources_obj = inherited_page_attribute(doc, page_id, b"Resources")?;
        let resources = match resources_obj {
            Some(obj) => self.resources(&obj)?,
            None => Arc::new(Resources::default()),
        };
        let media_box = inherited_page_attribute(doc, page_id, b"CropBox")?
            .or(inherited_page_attribute(doc, page_id, b"MediaBox")?)
            .and_then(|obj| parse_box_object(doc, &obj))
            .unwrap_or_else(|| BBox::new(0.0, 0.0, 612.0, 792.0));
        let operations = doc
            .get_page_content(page_id)
            .map_err(|e| e.to_string())
            .and_then(|bytes| Content::decode(&bytes).map_err(|e| e.to_string()))
            .map(|content| content.operations);
        debug!(
            page = page_index,
            ops = operations.as_ref().map(Vec::len).unwrap_or(0),
            "page snapshot loaded"
        );
        Ok(PageSnapshot {
            page_index,
            page_id,
            media_box,
            operations,
            resources,
        })
    }

    fn resources(&mut self, obj: &LoObject) -> Result<Arc<Resources>, RedactError> {
        let doc = self.doc;
        let dict = resolve_dict(doc, obj)?;
        let mut out = Resources::default();

        if let Some(font_dict) = dict_get(doc, &dict, b"Font").and_then(|o| o.as_dict().ok()) {
            for (name, font_obj) in font_dict.iter() {
                out.fonts.insert(name.clone(), self.font(font_obj, name));
            }
        }

        if let Some(gs_dict) = dict_get(doc, &dict, b"ExtGState").and_then(|o| o.as_dict().ok()) {
            for (name, gs_obj) in gs_dict.iter() {
                let Some(gs) = resolve_object(doc, gs_obj)
                    .ok()
                    .and_then(|o| o.as_dict().ok())
                else {
                    continue;
                };
                let parsed = self.ext_gstate(gs);
                out.ext_gstates.insert(name.clone(), Arc::new(parsed));
            }
        }

        let mut scope = Arc::new(out);

        if let Some(xobj_dict) = dict_get(doc, &dict, b"XObject").and_then(|o| o.as_dict().ok()) {
            let mut xobjects = HashMap::new();
            for (name, ref_obj) in xobj_dict.iter() {
                let xobject = self.xobject(ref_obj, &scope)?;
                xobjects.insert(name.clone(), xobject);
            }
            let mut with_xobjects = (*scope).clone();
            with_xobjects.xobjects.extend(xobjects);
            scope = Arc::new(with_xobjects);
        }
        Ok(scope)
    }

    fn font(&mut self, obj: &LoObject, name: &[u8]) -> Arc<FontMetrics> {
        let doc = self.doc;
        let id = obj.as_reference().ok();
        if let Some(cached) = id.and_then(|id| self.fonts.get(&id)) {
            return cached.clone();
        }
        let metrics = match resolve_object(doc, obj).ok().and_then(|o| o.as_dict().ok()) {
            Some(dict) => parse_font_metrics(doc, dict),
            None => FontMetrics::unknown(&name_bytes_to_string(name)),
        };
        trace!(font = %metrics.name, source = ?metrics.source(), "font metrics parsed");
        let metrics = Arc::new(metrics);
        if let Some(id) = id {
            self.fonts.insert(id, metrics.clone());
        }
        metrics
    }

    fn ext_gstate(&mut self, gs: &LoDictionary) -> ExtGState {
        let doc = self.doc;
        let number = |key: &[u8]| dict_get(doc, gs, key).and_then(obj_to_f64);
        let mut out = ExtGState {
            line_width: number(b"LW"),
            line_cap: number(b"LC").map(|v| v as i64),
            line_join: number(b"LJ").map(|v| v as i64),
            miter_limit: number(b"ML"),
            ..ExtGState::default()
        };
        if let Some(dash) = dict_get(doc, gs, b"D").and_then(|o| o.as_array().ok()) {
            let pattern = dash
                .first()
                .and_then(|o| resolve_object(doc, o).ok())
                .and_then(|o| o.as_array().ok())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|o| resolved_obj_to_f64(doc, o))
                        .collect::<Vec<_>>()
                });
            let phase = dash.get(1).and_then(|o| resolved_obj_to_f64(doc, o));
            if let (Some(pattern), Some(phase)) = (pattern, phase) {
                out.dash = Some((pattern, phase));
            }
        }
        if let Some(font) = dict_get(doc, gs, b"Font").and_then(|o| o.as_array().ok()) {
            let size = font.get(1).and_then(|o| resolved_obj_to_f64(doc, o));
            if let (Some(font_obj), Some(size)) = (font.first(), size) {
                out.font = Some((self.font(font_obj, b"ExtGState"), size));
            }
        }
        out
    }

    fn xobject(&mut self, obj: &LoObject, scope: &Arc<Resources>) -> Result<XObject, RedactError> {
        let doc = self.doc;
        let Ok(id) = obj.as_reference() else {
            return Ok(XObject::Opaque("direct xobject".to_string()));
        };
        if let Some(cached) = self.xobjects.get(&id) {
            return Ok(cached.clone());
        }
        let Ok(stream) = doc.get_object(id).and_then(LoObject::as_stream) else {
            return Ok(XObject::Opaque(format!("{} {} R is not a stream", id.0, id.1)));
        };
        let subtype = dict_name(doc, &stream.dict, b"Subtype").unwrap_or_default();
        let xobject = match subtype.as_str() {
            "Image" => XObject::Image(Arc::new(self.image(id, stream))),
            "Form" => {
                if !self.visiting.insert(id) {
                    return Ok(XObject::Opaque("recursive form".to_string()));
                }
                let form = self.form(id, stream, scope);
                self.visiting.remove(&id);
                let form = form?;
                // Forms without their own resources depend on the caller's scope.
                if stream.dict.has(b"Resources") {
                    self.xobjects.insert(id, XObject::Form(form.clone()));
                }
                return Ok(XObject::Form(form));
            }
            other => XObject::Opaque(format!("xobject subtype {other}")),
        };
        self.xobjects.insert(id, xobject.clone());
        Ok(xobject)
    }

    fn image(&mut self, id: ObjectId, stream: &Stream) -> ImageXObject {
        let doc = self.doc;
        let smask = dict_get(doc, &stream.dict, b"SMask")
            .and_then(|o| o.as_stream().ok())
            .map(|s| (s.clone(), image_info(doc, &s.dict)));
        let mask = match dict_get(doc, &stream.dict, b"Mask") {
            Some(LoObject::Stream(s)) => match image_info(doc, &s.dict) {
                Ok(info) => MaskSource::Stencil {
                    stream: s.clone(),
                    info,
                },
                Err(_) => MaskSource::None,
            },
            Some(LoObject::Array(ranges)) => {
                let values: Vec<u32> = ranges
                    .iter()
                    .filter_map(|o| resolved_obj_to_f64(doc, o))
                    .map(|v| v.max(0.0) as u32)
                    .collect();
                MaskSource::ColorKey(values.chunks_exact(2).map(|p| (p[0], p[1])).collect())
            }
            _ => MaskSource::None,
        };
        ImageXObject {
            id,
            stream: stream.clone(),
            info: image_info(doc, &stream.dict),
            smask,
            mask,
        }
    }

    fn form(
        &mut self,
        id: ObjectId,
        stream: &Stream,
        scope: &Arc<Resources>,
    ) -> Result<Arc<FormXObject>, RedactError> {
        let doc = self.doc;
        let bbox = stream
            .dict
            .get(b"BBox")
            .ok()
            .and_then(|o| parse_box_object(doc, o))
            .unwrap_or_else(|| BBox::new(f64::MIN / 4.0, f64::MIN / 4.0, f64::MAX / 4.0, f64::MAX / 4.0));
        let matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|o| parse_matrix_object(doc, o))
            .unwrap_or_else(Matrix::identity);
        // Only a form without its own /Resources sees the invoking stream's.
        let resources = match stream.dict.get(b"Resources") {
            Ok(obj) => self.resources(obj)?,
            Err(_) => scope.clone(),
        };
        Ok(Arc::new(FormXObject {
            id,
            stream: stream.clone(),
            bbox,
            matrix,
            resources,
        }))
    }
}

/// Looks a page attribute up through the `/Parent` chain.
pub(crate) fn inherited_page_attribute(
    doc: &LoDocument,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<LoObject>, RedactError> {
    let mut id = page_id;
    let mut seen = HashSet::new();
    while seen.insert(id) {
        let dict = doc.get_object(id)?.as_dict()?;
        if let Ok(obj) = dict.get(key) {
            return Ok(Some(obj.clone()));
        }
        id = match dict.get(b"Parent").and_then(LoObject::as_reference) {
            Ok(parent_id) => parent_id,
            Err(_) => break,
        };
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::WidthSource;
    use lopdf::dictionary;

    fn one_page_doc(resources: LoDictionary, content: &[u8]) -> (LoDocument, ObjectId) {
        let mut doc = LoDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 300.into(), 400.into()],
                "Resources" => resources,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        (doc, page_id)
    }

    #[test]
    fn page_snapshot_inherits_resources_and_media_box() {
        let (doc, page_id) = one_page_doc(
            dictionary! {
                "Font" => dictionary! {
                    "F1" => dictionary! { "Type" => "Font", "Subtype" => "Type1", "BaseFont" => "Helvetica" },
                },
            },
            b"BT /F1 12 Tf (Hi) Tj ET",
        );
        let mut loader = ResourceLoader::new(&doc);
        let snapshot = loader.page(0, page_id).expect("snapshot");
        assert_eq!(snapshot.media_box, BBox::new(0.0, 0.0, 300.0, 400.0));
        assert_eq!(snapshot.operations.as_ref().map(Vec::len).unwrap_or(0), 4);
        let font = snapshot.resources.font(b"F1").expect("font");
        assert_eq!(font.source(), WidthSource::Font);
    }

    #[test]
    fn form_without_resources_sees_the_invoking_scope() {
        let mut doc = LoDocument::with_version("1.5");
        let form_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 10.into(), 10.into()],
                "Matrix" => vec![2.into(), 0.into(), 0.into(), 2.into(), 5.into(), 5.into()],
            },
            b"0 0 10 10 re f".to_vec(),
        ));
        let resources = dictionary! {
            "XObject" => dictionary! { "Fm1" => form_id },
            "Font" => dictionary! {
                "F1" => dictionary! { "Subtype" => "Type1", "BaseFont" => "Courier" },
            },
        };
        let mut loader = ResourceLoader::new(&doc);
        let scope = loader
            .resources(&LoObject::Dictionary(resources))
            .expect("resources");
        let Some(XObject::Form(form)) = scope.xobject(b"Fm1") else {
            panic!("expected form");
        };
        assert_eq!(form.matrix, Matrix::from_operands(2.0, 0.0, 0.0, 2.0, 5.0, 5.0));
        assert!(form.resources.font(b"F1").is_some());
        assert!(scope.xobject_names().contains(b"Fm1".as_slice()));
    }

    #[test]
    fn self_referencing_form_is_opaque_not_infinite() {
        let mut doc = LoDocument::with_version("1.5");
        let form_id = doc.new_object_id();
        doc.objects.insert(
            form_id,
            LoObject::Stream(Stream::new(
                dictionary! {
                    "Subtype" => "Form",
                    "Resources" => dictionary! { "XObject" => dictionary! { "Me" => form_id } },
                },
                b"/Me Do".to_vec(),
            )),
        );
        let mut loader = ResourceLoader::new(&doc);
        let scope = loader
            .resources(
                &LoObject::Dictionary(dictionary! { "XObject" => dictionary! { "Fm" => form_id } }),
            )
            .expect("resources");
        let Some(XObject::Form(form)) = scope.xobject(b"Fm") else {
            panic!("expected form");
        };
        assert!(matches!(form.resources.xobject(b"Me"), Some(XObject::Opaque(_))));
    }

    #[test]
    fn form_with_own_resources_does_not_inherit() {
        let mut doc = LoDocument::with_version("1.5");
        let form_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 10.into(), 10.into()],
                "Resources" => dictionary! {
                    "Font" => dictionary! {
                        "F2" => dictionary! { "Subtype" => "Type1", "BaseFont" => "Times-Roman" },
                    },
                },
            },
            b"BT /F2 10 Tf (x) Tj ET".to_vec(),
        ));
        let resources = dictionary! {
            "XObject" => dictionary! { "Fm1" => form_id },
            "Font" => dictionary! {
                "F1" => dictionary! { "Subtype" => "Type1", "BaseFont" => "Courier" },
            },
            "ExtGState" => dictionary! { "GS0" => dictionary! { "LW" => 4 } },
        };
        let mut loader = ResourceLoader::new(&doc);
        let scope = loader
            .resources(&LoObject::Dictionary(resources))
            .expect("resources");
        let Some(XObject::Form(form)) = scope.xobject(b"Fm1") else {
            panic!("expected form");
        };
        assert!(form.resources.font(b"F2").is_some());
        assert!(form.resources.font(b"F1").is_none());
        assert!(form.resources.ext_gstate(b"GS0").is_none());
        assert!(scope.ext_gstate(b"GS0").is_some());
    }
}
