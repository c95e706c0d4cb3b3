use super::error::{PDFError, PDFResult};
use super::lexer::{expect_token, is_whitespace, next_token, TokenKind};
use super::object::Dict;
use super::parser::{parse_dict, parse_indirect_object};
use super::object::PDFObject;

/// One subsection of a classic xref table.
#[derive(Debug, Clone, PartialEq)]
pub struct XrefSubsection {
    /// First object number covered by this subsection
    pub first: u32,

    /// One row per object number, in order
    pub rows: Vec<XrefRow>,
}

/// One 20-byte row of a classic xref table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrefRow {
    /// Byte offset for in-use entries, next free object number otherwise
    pub offset: u64,

    /// Generation number
    pub gen: u32,

    /// True for `n` rows, false for `f` rows
    pub in_use: bool,
}

/// A top-level file region.
///
/// A PDF file is a sequence of these: the header comment, indirect-object
/// definitions, xref tables with their trailers, `startxref` pointers and
/// `%%EOF` markers, possibly interleaved with stray comments.
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    /// `%PDF-M.N` header comment
    Header {
        start: usize,
        end: usize,
        version: String,
    },

    /// `%%EOF` marker
    Eof { start: usize, end: usize },

    /// Any other comment (e.g. the binary marker after the header)
    Comment { start: usize, end: usize },

    /// `N G obj … endobj`
    IndirectObject {
        start: usize,
        end: usize,
        num: u32,
        gen: u16,
        object: PDFObject,
    },

    /// Classic `xref` table followed by `trailer <<…>>`
    XrefTable {
        start: usize,
        end: usize,
        subsections: Vec<XrefSubsection>,
        trailer: Dict,
        /// Offset of the `trailer` keyword
        trailer_pos: usize,
    },

    /// `startxref N`
    Startxref {
        start: usize,
        end: usize,
        offset: u64,
    },
}

impl Region {
    /// Returns the starting byte offset of the region.
    pub fn start(&self) -> usize {
        match self {
            Region::Header { start, .. }
            | Region::Eof { start, .. }
            | Region::Comment { start, .. }
            | Region::IndirectObject { start, .. }
            | Region::XrefTable { start, .. }
            | Region::Startxref { start, .. } => *start,
        }
    }

    /// Returns the offset just past the region.
    pub fn end(&self) -> usize {
        match self {
            Region::Header { end, .. }
            | Region::Eof { end, .. }
            | Region::Comment { end, .. }
            | Region::IndirectObject { end, .. }
            | Region::XrefTable { end, .. }
            | Region::Startxref { end, .. } => *end,
        }
    }
}

/// Parses a classic xref table starting at the `xref` keyword.
///
/// Subsections are `first count` headers followed by `count` rows of
/// `offset gen (n|f)`. The table ends at the `trailer` keyword, which is
/// followed by the trailer dictionary.
///
/// Returns `(subsections, trailer, trailer_pos, end)`.
pub fn parse_xref_table_at(
    data: &[u8],
    pos: usize,
) -> PDFResult<(Vec<XrefSubsection>, Dict, usize, usize)> {
    let kw = expect_token(data, pos)?;
    if &data[kw.start..kw.end] != b"xref" {
        return Err(PDFError::xref(pos, "expected 'xref' keyword"));
    }
    let mut subsections = Vec::new();
    let mut cursor = kw.end;
    loop {
        let token = expect_token(data, cursor)?;
        if token.kind == TokenKind::Keyword && &data[token.start..token.end] == b"trailer" {
            let dict_token = expect_token(data, token.end)?;
            if dict_token.kind != TokenKind::Dict {
                return Err(PDFError::xref(pos, "expected trailer dictionary"));
            }
            let trailer = parse_dict(data, &dict_token)?;
            return Ok((subsections, trailer, token.start, dict_token.end));
        }
        if token.kind != TokenKind::Integer {
            return Err(PDFError::xref(
                token.start,
                "expected subsection header or 'trailer'",
            ));
        }
        let first = int_at(data, token.start, token.end)?;
        let count_token = expect_token(data, token.end)?;
        if count_token.kind != TokenKind::Integer {
            return Err(PDFError::xref(count_token.start, "expected subsection count"));
        }
        let count = int_at(data, count_token.start, count_token.end)?;
        cursor = count_token.end;
        let mut rows = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let off_token = expect_token(data, cursor)?;
            let gen_token = expect_token(data, off_token.end)?;
            let use_token = expect_token(data, gen_token.end)?;
            if off_token.kind != TokenKind::Integer || gen_token.kind != TokenKind::Integer {
                return Err(PDFError::xref(off_token.start, "malformed xref row"));
            }
            let in_use = match &data[use_token.start..use_token.end] {
                b"n" => true,
                b"f" => false,
                _ => return Err(PDFError::xref(use_token.start, "expected 'n' or 'f'")),
            };
            rows.push(XrefRow {
                offset: int_at(data, off_token.start, off_token.end)?,
                gen: int_at(data, gen_token.start, gen_token.end)? as u32,
                in_use,
            });
            cursor = use_token.end;
        }
        subsections.push(XrefSubsection {
            first: first as u32,
            rows,
        });
    }
}

fn int_at(data: &[u8], start: usize, end: usize) -> PDFResult<u64> {
    std::str::from_utf8(&data[start..end])
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| PDFError::parse(start, "malformed integer"))
}

/// Parses the top-level region starting at or after `pos`.
///
/// Returns `Ok(None)` when only whitespace remains. Bytes that do not
/// begin any known region are a parse error carrying their offset.
pub fn parse_region(data: &[u8], pos: usize) -> PDFResult<Option<Region>> {
    let mut i = pos;
    while i < data.len() && is_whitespace(data[i]) {
        i += 1;
    }
    if i >= data.len() {
        return Ok(None);
    }
    let start = i;
    match data[i] {
        b'%' => {
            let token = expect_token(data, start)?;
            let text = &data[token.start..token.end];
            if text.starts_with(b"%PDF-") && text.len() >= 8 {
                let version = String::from_utf8_lossy(&text[5..8]).into_owned();
                Ok(Some(Region::Header {
                    start,
                    end: token.end,
                    version,
                }))
            } else if text.starts_with(b"%%EOF") {
                Ok(Some(Region::Eof {
                    start,
                    end: start + 5,
                }))
            } else {
                Ok(Some(Region::Comment {
                    start,
                    end: token.end,
                }))
            }
        }
        b'0'..=b'9' => {
            let (num, gen, object, end) = parse_indirect_object(data, start)?;
            Ok(Some(Region::IndirectObject {
                start,
                end,
                num,
                gen,
                object,
            }))
        }
        b'x' => {
            let (subsections, trailer, trailer_pos, end) = parse_xref_table_at(data, start)?;
            Ok(Some(Region::XrefTable {
                start,
                end,
                subsections,
                trailer,
                trailer_pos,
            }))
        }
        b's' => {
            let kw = expect_token(data, start)?;
            if &data[kw.start..kw.end] != b"startxref" {
                return Err(PDFError::parse(start, "unknown region"));
            }
            let num = expect_token(data, kw.end)?;
            if num.kind != TokenKind::Integer {
                return Err(PDFError::parse(num.start, "expected startxref offset"));
            }
            Ok(Some(Region::Startxref {
                start,
                end: num.end,
                offset: int_at(data, num.start, num.end)?,
            }))
        }
        _ => Err(PDFError::parse(start, "unknown region")),
    }
}

/// Parses the whole file as a sequence of regions, without consulting any
/// cross-reference structure. This is the substrate of the disassembly
/// view and works on files whose xref is broken.
pub fn scan_regions(data: &[u8]) -> PDFResult<Vec<Region>> {
    let mut regions = Vec::new();
    let mut pos = 0;
    while let Some(region) = parse_region(data, pos)? {
        pos = region.end();
        regions.push(region);
    }
    Ok(regions)
}

/// Returns true when the head of the file holds a `/Linearized` first
/// object (fast-web-view layout).
pub fn linearized_dict(data: &[u8]) -> Option<Dict> {
    // The linearization dictionary must sit in the first kilobyte or so,
    // right after the header comment(s).
    let window = &data[..data.len().min(1024)];
    let mut pos = 0;
    loop {
        match next_token(window, pos) {
            Ok(Some(t)) if t.kind == TokenKind::Comment => pos = t.end,
            Ok(Some(t)) if t.kind == TokenKind::Integer => {
                return match parse_indirect_object(data, t.start) {
                    Ok((_, _, obj, _)) => match obj {
                        PDFObject::Dictionary(d) if d.contains_key("/Linearized") => Some(d),
                        _ => None,
                    },
                    Err(_) => None,
                };
            }
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_region() {
        let data = b"%PDF-1.4\n";
        let region = parse_region(data, 0).unwrap().unwrap();
        match region {
            Region::Header { start, version, .. } => {
                assert_eq!(start, 0);
                assert_eq!(version, "1.4");
            }
            other => panic!("expected header, got {:?}", other),
        }
    }

    #[test]
    fn test_eof_region() {
        let data = b"%%EOF\n";
        let region = parse_region(data, 0).unwrap().unwrap();
        assert_eq!(region, Region::Eof { start: 0, end: 5 });
    }

    #[test]
    fn test_startxref_region() {
        let data = b"startxref\n1234\n";
        let region = parse_region(data, 0).unwrap().unwrap();
        match region {
            Region::Startxref { offset, .. } => assert_eq!(offset, 1234),
            other => panic!("expected startxref, got {:?}", other),
        }
    }

    #[test]
    fn test_indirect_object_region() {
        let data = b"1 0 obj\n<< /Type /Catalog >>\nendobj\n";
        let region = parse_region(data, 0).unwrap().unwrap();
        match region {
            Region::IndirectObject { num, gen, object, .. } => {
                assert_eq!((num, gen), (1, 0));
                assert!(object.as_dict().is_some());
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_xref_table_region() {
        let data = b"xref\n0 3\n0000000000 65535 f \n0000000009 00000 n \n0000000100 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R >>\n";
        let (subsections, trailer, trailer_pos, _end) = parse_xref_table_at(data, 0).unwrap();
        assert_eq!(subsections.len(), 1);
        assert_eq!(subsections[0].first, 0);
        assert_eq!(subsections[0].rows.len(), 3);
        assert!(!subsections[0].rows[0].in_use);
        assert_eq!(subsections[0].rows[1].offset, 9);
        assert_eq!(subsections[0].rows[2].offset, 100);
        assert_eq!(trailer.get("/Size"), Some(&PDFObject::Integer(3)));
        assert_eq!(&data[trailer_pos..trailer_pos + 7], b"trailer");
    }

    #[test]
    fn test_xref_table_multiple_subsections() {
        let data =
            b"xref\n0 1\n0000000000 65535 f \n4 2\n0000000200 00000 n \n0000000300 00001 n \ntrailer\n<< /Size 6 >>";
        let (subsections, _, _, _) = parse_xref_table_at(data, 0).unwrap();
        assert_eq!(subsections.len(), 2);
        assert_eq!(subsections[1].first, 4);
        assert_eq!(subsections[1].rows[1].gen, 1);
    }

    #[test]
    fn test_xref_table_missing_trailer() {
        let data = b"xref\n0 1\n0000000000 65535 f \n";
        assert!(parse_xref_table_at(data, 0).is_err());
    }

    #[test]
    fn test_scan_whole_file() {
        let mut data = Vec::new();
        data.extend_from_slice(b"%PDF-1.4\n");
        data.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        data.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
        let xref_at = data.len();
        data.extend_from_slice(
            b"xref\n0 3\n0000000000 65535 f \n0000000009 00000 n \n0000000058 00000 n \n",
        );
        data.extend_from_slice(b"trailer\n<< /Size 3 /Root 1 0 R >>\n");
        data.extend_from_slice(format!("startxref\n{}\n", xref_at).as_bytes());
        data.extend_from_slice(b"%%EOF\n");

        let regions = scan_regions(&data).unwrap();
        let kinds: Vec<&str> = regions
            .iter()
            .map(|r| match r {
                Region::Header { .. } => "header",
                Region::IndirectObject { .. } => "obj",
                Region::XrefTable { .. } => "xref",
                Region::Startxref { .. } => "startxref",
                Region::Eof { .. } => "eof",
                Region::Comment { .. } => "comment",
            })
            .collect();
        assert_eq!(kinds, vec!["header", "obj", "obj", "xref", "startxref", "eof"]);
    }

    #[test]
    fn test_unknown_region_errors() {
        assert!(parse_region(b"@garbage", 0).is_err());
    }

    #[test]
    fn test_linearized_detection() {
        let data =
            b"%PDF-1.4\n1 0 obj\n<< /Linearized 1.0 /L 1000 /N 1 >>\nendobj\nrest of file";
        let dict = linearized_dict(data).unwrap();
        assert!(dict.contains_key("/Linearized"));

        let plain = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n";
        assert!(linearized_dict(plain).is_none());
    }
}
