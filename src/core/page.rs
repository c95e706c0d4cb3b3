use super::document::PDFDocument;
use super::error::{PDFError, PDFResult};
use super::object::{Dict, PDFObject};
use rustc_hash::FxHashSet;

/// Page attributes inherited from ancestor `/Pages` nodes.
pub const INHERITABLE_ATTRS: [&str; 4] = ["/Resources", "/MediaBox", "/CropBox", "/Rotate"];

/// Converts inches to points.
fn in2pt(inches: f64) -> i64 {
    (inches * 72.0) as i64
}

/// Converts millimeters to points.
fn mm2pt(millimeters: f64) -> i64 {
    (millimeters / 25.4 * 72.0).round() as i64
}

/// Known paper sizes in points (width, height).
fn paper_name(w: i64, h: i64) -> Option<&'static str> {
    let sizes: [((i64, i64), &str); 14] = [
        ((in2pt(11.0), in2pt(17.0)), "US Tabloid"),
        ((in2pt(8.5), in2pt(14.0)), "US Legal"),
        ((in2pt(8.5), in2pt(11.0)), "US Letter"),
        ((mm2pt(841.0), mm2pt(1189.0)), "A0"),
        ((mm2pt(594.0), mm2pt(841.0)), "A1"),
        ((mm2pt(420.0), mm2pt(594.0)), "A2"),
        ((mm2pt(297.0), mm2pt(420.0)), "A3"),
        ((mm2pt(210.0), mm2pt(297.0)), "A4"),
        ((mm2pt(148.0), mm2pt(210.0)), "A5"),
        ((mm2pt(105.0), mm2pt(148.0)), "A6"),
        ((mm2pt(74.0), mm2pt(105.0)), "A7"),
        ((mm2pt(52.0), mm2pt(74.0)), "A8"),
        ((mm2pt(37.0), mm2pt(52.0)), "A9"),
        ((mm2pt(26.0), mm2pt(37.0)), "A10"),
    ];
    sizes
        .iter()
        .find(|((sw, sh), _)| (*sw == w && *sh == h) || (*sw == h && *sh == w))
        .map(|(_, name)| *name)
}

/// Describes a MediaBox as physical dimensions plus the detected paper
/// size.
pub fn paper(mediabox: &[f64]) -> String {
    if mediabox.len() != 4 {
        return "unknown".to_string();
    }
    let x = mediabox[2] - mediabox[0];
    let y = mediabox[3] - mediabox[1];
    let ptype = paper_name(x as i64, y as i64).unwrap_or("unknown");
    format!(
        "{}x{}mm or {}x{}in ({})",
        (x * 25.4 / 72.0) as i64,
        (y * 25.4 / 72.0) as i64,
        (x / 72.0 * 100.0).round() / 100.0,
        (y / 72.0 * 100.0).round() / 100.0,
        ptype
    )
}

fn walk(
    doc: &mut PDFDocument,
    node_ref: &PDFObject,
    inherited: &Dict,
    visited: &mut FxHashSet<u32>,
    out: &mut Vec<(u32, Dict)>,
) -> PDFResult<()> {
    let (num, _gen) = node_ref
        .as_reference()
        .ok_or_else(|| PDFError::parse(0, "page tree node is not a reference"))?;
    if !visited.insert(num) {
        return Err(PDFError::parse(0, "circular reference in page tree"));
    }
    let node = doc.get_indirect(num)?;
    let dict = node
        .as_dict()
        .ok_or_else(|| PDFError::parse(0, format!("page tree node {} is not a dictionary", num)))?
        .clone();
    match dict.get("/Type").and_then(|o| o.as_name()) {
        Some("/Pages") => {
            let mut passed = inherited.clone();
            for attr in INHERITABLE_ATTRS {
                if let Some(value) = dict.get(attr) {
                    passed.insert(attr.to_string(), value.clone());
                }
            }
            let kids = match doc.dict_get(&dict, "/Kids")? {
                Some(PDFObject::Array(items)) => items,
                _ => {
                    return Err(PDFError::parse(
                        0,
                        format!("/Pages node {} has no /Kids array", num),
                    ))
                }
            };
            for kid in kids {
                walk(doc, &kid, &passed, visited, out)?;
            }
            Ok(())
        }
        Some("/Page") => {
            out.push((num, inherited.clone()));
            Ok(())
        }
        other => Err(PDFError::parse(
            0,
            format!("page tree node {} has /Type {:?}", num, other),
        )),
    }
}

/// Flattens the page tree into `(page object number, inherited attrs)`
/// pairs, in document order.
pub fn flat_page_tree(doc: &mut PDFDocument) -> PDFResult<Vec<(u32, Dict)>> {
    let catalog = doc.catalog()?;
    let pages_ref = catalog
        .get("/Pages")
        .cloned()
        .ok_or_else(|| PDFError::parse(0, "catalog has no /Pages"))?;
    let mut out = Vec::new();
    let mut visited = FxHashSet::default();
    walk(doc, &pages_ref, &Dict::new(), &mut visited, &mut out)?;
    Ok(out)
}

/// Lists the page dictionaries with inherited attributes merged in
/// (the page's own entries win).
pub fn pages(doc: &mut PDFDocument) -> PDFResult<Vec<Dict>> {
    let tree = flat_page_tree(doc)?;
    let mut result = Vec::with_capacity(tree.len());
    for (num, inherited) in tree {
        let mut dict = doc
            .get_indirect(num)?
            .as_dict()
            .cloned()
            .unwrap_or_default();
        for (key, value) in inherited {
            if !dict.contains_key(&key) {
                dict.insert(key, value);
            }
        }
        result.push(dict);
    }
    Ok(result)
}

/// Lists `(MediaBox, Rotate)` per page, attributes resolved through
/// references and inheritance.
pub fn page_layouts(doc: &mut PDFDocument) -> PDFResult<Vec<(Vec<f64>, i64)>> {
    let mut layouts = Vec::new();
    for page in pages(doc)? {
        let mediabox = match doc.dict_get(&page, "/MediaBox")? {
            Some(PDFObject::Array(items)) => items
                .iter()
                .filter_map(|o| o.as_number())
                .collect::<Vec<f64>>(),
            _ => Vec::new(),
        };
        let rotate = doc
            .dict_get(&page, "/Rotate")?
            .and_then(|o| o.as_int())
            .unwrap_or(0);
        layouts.push((mediabox, rotate));
    }
    Ok(layouts)
}
