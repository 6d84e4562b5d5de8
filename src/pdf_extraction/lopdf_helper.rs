// lopdf helper - Pure Rust PDF object access shared by the content-stream engines
use std::collections::BTreeMap;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};

use super::fonts::FontDecoder;
use crate::types::EngineError;

/// Follow a reference one level; direct objects come back unchanged.
pub fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

pub fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(document, object)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

pub fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(f) => Some(*f),
        _ => None,
    }
}

/// Page ids in page order (0-based index, id).
pub fn pages(document: &Document) -> Vec<(usize, ObjectId)> {
    document
        .get_pages()
        .into_values()
        .enumerate()
        .collect()
}

/// The page's `/Resources`, walking up `/Parent` links for inherited ones.
fn page_resources<'a>(document: &'a Document, page_id: ObjectId) -> Option<&'a Dictionary> {
    let mut node = document.get_dictionary(page_id).ok()?;
    // Page trees deeper than this are malformed.
    for _ in 0..32 {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve_dict(document, resources);
        }
        node = match node.get(b"Parent") {
            Ok(parent) => resolve_dict(document, parent)?,
            Err(_) => return None,
        };
    }
    None
}

/// Decoders for every font the page can reference, keyed by resource name.
pub fn page_fonts(document: &Document, page_id: ObjectId) -> BTreeMap<Vec<u8>, FontDecoder> {
    let mut fonts = BTreeMap::new();
    let Some(font_dict) = page_resources(document, page_id)
        .and_then(|resources| resources.get(b"Font").ok())
        .and_then(|fonts| resolve_dict(document, fonts))
    else {
        return fonts;
    };

    for (name, font) in font_dict.iter() {
        if let Some(font) = resolve_dict(document, font) {
            fonts.insert(name.clone(), FontDecoder::from_font(document, font));
        }
    }
    fonts
}

/// Decoded content stream operations of a page.
pub fn page_operations(document: &Document, page_id: ObjectId) -> Result<Vec<Operation>, EngineError> {
    let data = document.get_page_content(page_id)?;
    let content = Content::decode(&data)?;
    Ok(content.operations)
}
