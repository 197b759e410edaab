use lopdf::content::Operation;
use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, ObjectId as LoObjectId};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::RedactError;
use crate::flate::flate_stream;
use crate::geometry::BBox;
use crate::metrics::{PageOutcome, PageReport};
use crate::object::{parse_box_object, resolve_dict, resolve_object};
use crate::ops::{encode_operations, op};
use crate::processor::{PageContent, PageRewrite, PendingXObject};
use crate::resources::inherited_page_attribute;

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn encode(operations: Vec<Operation>) -> Result<Vec<u8>, RedactError> {
    Ok(encode_operations(&operations)?)
}

fn add_content_stream(doc: &mut LoDocument, bytes: &[u8]) -> Result<LoObjectId, RedactError> {
    let stream = flate_stream(LoDictionary::new(), bytes)?;
    Ok(doc.add_object(stream))
}

fn xobject_dict(doc: &LoDocument, resources: &LoDictionary) -> Result<LoDictionary, RedactError> {
    match resources.get(b"XObject") {
        Ok(obj) => resolve_dict(doc, obj),
        Err(_) => Ok(LoDictionary::new()),
    }
}

/// Writes pending XObjects into the document and binds their names in a
/// direct copy of `resources`.
fn bind_xobjects(
    doc: &mut LoDocument,
    mut resources: LoDictionary,
    pending: Vec<PendingXObject>,
) -> Result<LoDictionary, RedactError> {
    if pending.is_empty() {
        return Ok(resources);
    }
    let mut xobjects = xobject_dict(doc, &resources)?;
    for xobject in pending {
        let (name, id) = materialize(doc, &resources, xobject)?;
        xobjects.set(name, LoObject::Reference(id));
    }
    resources.set("XObject", LoObject::Dictionary(xobjects));
    Ok(resources)
}

fn materialize(
    doc: &mut LoDocument,
    scope: &LoDictionary,
    xobject: PendingXObject,
) -> Result<(Vec<u8>, LoObjectId), RedactError> {
    match xobject {
        PendingXObject::Image { name, rewrite } => {
            let mut image = rewrite.image;
            if let Some(smask) = rewrite.smask {
                let smask_id = doc.add_object(smask);
                image.dict.set("SMask", LoObject::Reference(smask_id));
            }
            Ok((name, doc.add_object(image)))
        }
        PendingXObject::Form {
            name,
            source,
            mut dict,
            operations,
            xobjects,
        } => {
            // The copy gets its own resource dictionary so names chosen
            // inside it cannot collide with the enclosing scope's.
            let own = match dict.get(b"Resources") {
                Ok(obj) => resolve_dict(doc, obj)?,
                Err(_) => scope.clone(),
            };
            let resources = bind_xobjects(doc, own, xobjects)?;
            dict.set("Resources", LoObject::Dictionary(resources));
            dict.remove(b"Length");
            let bytes = encode(operations)?;
            let stream = flate_stream(dict, &bytes)?;
            debug!(source = ?source, "form xobject rewritten");
            Ok((name, doc.add_object(stream)))
        }
    }
}

fn page_dict_mut(doc: &mut LoDocument, page_id: LoObjectId) -> Result<&mut LoDictionary, RedactError> {
    Ok(doc.get_object_mut(page_id)?.as_dict_mut()?)
}

fn page_contents(doc: &LoDocument, page_id: LoObjectId) -> Result<Vec<LoObject>, RedactError> {
    let page = doc.get_object(page_id)?.as_dict()?;
    Ok(match page.get(b"Contents") {
        Ok(LoObject::Array(items)) => items.clone(),
        Ok(LoObject::Reference(id)) => match doc.get_object(*id) {
            Ok(LoObject::Array(items)) => items.clone(),
            _ => vec![LoObject::Reference(*id)],
        },
        _ => Vec::new(),
    })
}

/// Removes annotations whose `/Rect` overlaps a region. Returns how many
/// were removed.
fn remove_annotations(
    doc: &mut LoDocument,
    page_id: LoObjectId,
    regions: &[BBox],
) -> Result<usize, RedactError> {
    let annots = {
        let page = doc.get_object(page_id)?.as_dict()?;
        match page.get(b"Annots") {
            Ok(obj) => match resolve_object(doc, obj)? {
                LoObject::Array(items) => items.clone(),
                _ => return Ok(0),
            },
            Err(_) => return Ok(0),
        }
    };
    let overlaps = |annot: &LoObject| -> bool {
        let Ok(dict) = resolve_dict(doc, annot) else {
            return false;
        };
        dict.get(b"Rect")
            .ok()
            .and_then(|rect| parse_box_object(doc, rect))
            .is_some_and(|rect| regions.iter().any(|r| r.overlaps(&rect)))
    };
    let kept: Vec<LoObject> = annots.iter().filter(|a| !overlaps(*a)).cloned().collect();
    let removed = annots.len() - kept.len();
    if removed > 0 {
        let page = page_dict_mut(doc, page_id)?;
        if kept.is_empty() {
            page.remove(b"Annots");
        } else {
            page.set("Annots", LoObject::Array(kept));
        }
    }
    Ok(removed)
}

/// Writes one page's rewrite into the document. Objects the page no longer
/// references are left for pruning.
pub(crate) fn apply_page_rewrite(
    doc: &mut LoDocument,
    rewrite: PageRewrite,
    regions: &[BBox],
    strip_annotations: bool,
) -> Result<PageReport, RedactError> {
    let PageRewrite {
        page_index,
        page_id,
        content,
        xobjects,
        fallback,
        estimated,
        mut metrics,
    } = rewrite;

    if !xobjects.is_empty() {
        let resources = match inherited_page_attribute(doc, page_id, b"Resources")? {
            Some(obj) => resolve_dict(doc, &obj)?,
            None => LoDictionary::new(),
        };
        let resources = bind_xobjects(doc, resources, xobjects)?;
        page_dict_mut(doc, page_id)?.set("Resources", LoObject::Dictionary(resources));
    }

    let content_sha256 = match content {
        PageContent::Rewritten(operations) => {
            let bytes = encode(operations)?;
            let content_id = add_content_stream(doc, &bytes)?;
            page_dict_mut(doc, page_id)?.set("Contents", LoObject::Reference(content_id));
            Some(sha256_hex(&bytes))
        }
        PageContent::Wrapped { overpaint } => {
            let original = page_contents(doc, page_id)?;
            let open = add_content_stream(doc, &encode(vec![op("q", vec![])])?)?;
            let mut closing = vec![op("Q", vec![])];
            closing.extend(overpaint);
            let close = add_content_stream(doc, &encode(closing)?)?;
            let mut contents = Vec::with_capacity(original.len() + 2);
            contents.push(LoObject::Reference(open));
            contents.extend(original);
            contents.push(LoObject::Reference(close));
            page_dict_mut(doc, page_id)?.set("Contents", LoObject::Array(contents));
            None
        }
    };

    if strip_annotations {
        metrics.annotations_removed = remove_annotations(doc, page_id, regions)?;
    }

    debug!(
        page = page_index,
        annotations_removed = metrics.annotations_removed,
        "page written"
    );
    let outcome = match fallback {
        Some(reason) => PageOutcome::FallbackApplied { reason },
        None => PageOutcome::Redacted,
    };
    Ok(PageReport {
        page_index,
        outcome,
        metrics,
        metrics_estimated: estimated,
        content_sha256,
    })
}
