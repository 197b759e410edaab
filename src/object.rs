use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject};

use crate::error::RedactError;
use crate::geometry::{BBox, Matrix};

// Reference chains longer than this are returned unresolved.
const MAX_REFERENCE_HOPS: usize = 32;

pub(crate) fn resolve_object<'a>(
    doc: &'a LoDocument,
    mut obj: &'a LoObject,
) -> Result<&'a LoObject, RedactError> {
    for _ in 0..MAX_REFERENCE_HOPS {
        match obj {
            LoObject::Reference(id) => {
                obj = doc.get_object(*id)?;
            }
            _ => return Ok(obj),
        }
    }
    Ok(obj)
}

pub(crate) fn resolve_dict(doc: &LoDocument, obj: &LoObject) -> Result<LoDictionary, RedactError> {
    let resolved = resolve_object(doc, obj)?;
    match resolved {
        LoObject::Dictionary(d) => Ok(d.clone()),
        LoObject::Stream(s) => Ok(s.dict.clone()),
        _ => Ok(LoDictionary::new()),
    }
}

pub(crate) fn dict_get<'a>(
    doc: &'a LoDocument,
    dict: &'a LoDictionary,
    key: &[u8],
) -> Option<&'a LoObject> {
    let obj = dict.get(key).ok()?;
    resolve_object(doc, obj).ok()
}

pub(crate) fn dict_name(doc: &LoDocument, dict: &LoDictionary, key: &[u8]) -> Option<String> {
    dict_get(doc, dict, key)
        .and_then(|o| o.as_name().ok())
        .map(name_bytes_to_string)
}

pub(crate) fn dict_f64(doc: &LoDocument, dict: &LoDictionary, key: &[u8]) -> Option<f64> {
    dict_get(doc, dict, key).and_then(obj_to_f64)
}

pub(crate) fn dict_bool(doc: &LoDocument, dict: &LoDictionary, key: &[u8]) -> Option<bool> {
    dict_get(doc, dict, key).and_then(|o| o.as_bool().ok())
}

pub(crate) fn obj_to_f64(obj: &LoObject) -> Option<f64> {
    match obj {
        LoObject::Integer(v) => Some(*v as f64),
        LoObject::Real(v) => Some(*v as f64),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

pub(crate) fn resolved_obj_to_f64(doc: &LoDocument, obj: &LoObject) -> Option<f64> {
    obj_to_f64(resolve_object(doc, obj).ok()?)
}

pub(crate) fn resolved_obj_to_u16(doc: &LoDocument, obj: &LoObject) -> Option<u16> {
    let resolved = resolve_object(doc, obj).ok()?;
    if let Ok(v) = resolved.as_i64() {
        return u16::try_from(v).ok();
    }
    let v = obj_to_f64(resolved)?;
    if !(0.0..=(u16::MAX as f64)).contains(&v) {
        return None;
    }
    Some(v.round() as u16)
}

pub(crate) fn name_bytes_to_string(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_string()
}

pub(crate) fn parse_matrix_object(doc: &LoDocument, obj: &LoObject) -> Option<Matrix> {
    let arr = resolve_object(doc, obj).ok()?.as_array().ok()?;
    if arr.len() < 6 {
        return None;
    }
    let v: Vec<f64> = arr
        .iter()
        .take(6)
        .map(|o| resolved_obj_to_f64(doc, o))
        .collect::<Option<_>>()?;
    Some(Matrix::from_operands(v[0], v[1], v[2], v[3], v[4], v[5]))
}

pub(crate) fn parse_box_object(doc: &LoDocument, obj: &LoObject) -> Option<BBox> {
    let arr = resolve_object(doc, obj).ok()?.as_array().ok()?;
    if arr.len() < 4 {
        return None;
    }
    let v: Vec<f64> = arr
        .iter()
        .take(4)
        .map(|o| resolved_obj_to_f64(doc, o))
        .collect::<Option<_>>()?;
    Some(BBox::new(v[0], v[1], v[2], v[3]))
}

pub(crate) fn stream_filters(doc: &LoDocument, dict: &LoDictionary) -> Vec<String> {
    match dict_get(doc, dict, b"Filter") {
        Some(LoObject::Name(name)) => vec![name_bytes_to_string(name)],
        Some(LoObject::Array(items)) => items
            .iter()
            .filter_map(|o| resolve_object(doc, o).ok())
            .filter_map(|o| o.as_name().ok())
            .map(name_bytes_to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn resolves_reference_chains_and_numbers() {
        let mut doc = LoDocument::with_version("1.5");
        let inner = doc.add_object(LoObject::Real(2.5));
        let outer = doc.add_object(LoObject::Reference(inner));
        let value = resolved_obj_to_f64(&doc, &LoObject::Reference(outer));
        assert_eq!(value, Some(2.5));
        assert_eq!(resolved_obj_to_u16(&doc, &LoObject::Integer(70000)), None);
    }

    #[test]
    fn parses_matrix_and_box_arrays() {
        let doc = LoDocument::with_version("1.5");
        let m = parse_matrix_object(
            &doc,
            &LoObject::Array(vec![2.into(), 0.into(), 0.into(), 2.into(), 10.into(), 20.into()]),
        )
        .expect("matrix");
        assert_eq!(m, Matrix::from_operands(2.0, 0.0, 0.0, 2.0, 10.0, 20.0));
        let b = parse_box_object(
            &doc,
            &LoObject::Array(vec![100.into(), 0.into(), 0.into(), 50.into()]),
        )
        .expect("box");
        assert_eq!((b.x0, b.x1, b.y1), (0.0, 100.0, 50.0));
    }

    #[test]
    fn filter_lists_accept_name_or_array() {
        let doc = LoDocument::with_version("1.5");
        let single = dictionary! { "Filter" => "FlateDecode" };
        assert_eq!(stream_filters(&doc, &single), vec!["FlateDecode".to_string()]);
        let chain = dictionary! {
            "Filter" => vec![LoObject::Name(b"ASCIIHexDecode".to_vec()), LoObject::Name(b"DCTDecode".to_vec())],
        };
        assert_eq!(stream_filters(&doc, &chain).len(), 2);
    }
}
