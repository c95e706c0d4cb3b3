use super::error::PDFResult;
use super::filters;
use indexmap::IndexMap;

/// Dictionary entries, insertion-ordered.
///
/// Keys keep their leading `/` so a dictionary prints back the way it was
/// read.
pub type Dict = IndexMap<String, PDFObject>;

/// Decoded form of a stream's bytes.
///
/// Decode failures are carried as a tagged variant rather than a sentinel
/// byte string, so downstream code cannot mistake an error for content.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Successfully decoded bytes
    Data(Vec<u8>),

    /// Decoding failed; the reason is kept for display
    Failed(String),
}

impl Decoded {
    /// Returns the decoded bytes, or None if decoding failed.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Decoded::Data(d) => Some(d),
            Decoded::Failed(_) => None,
        }
    }

    /// Returns true if decoding failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Decoded::Failed(_))
    }
}

/// A stream object: its dictionary plus both byte forms.
///
/// Both the raw encoded bytes and the decoded bytes are retained; any
/// `/Length` entry is overridden with `encoded.len()` at serialize time.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamObject {
    /// The stream dictionary
    pub entries: Dict,

    /// Raw bytes as stored in the file (after the `stream` keyword)
    pub encoded: Vec<u8>,

    /// Bytes after running the `/Filter` pipeline
    pub decoded: Decoded,
}

impl StreamObject {
    /// Builds a stream from plain content, encoding it per the dictionary's
    /// `/Filter` entry.
    pub fn forge(entries: Dict, content: Vec<u8>) -> PDFResult<Self> {
        let encoded = filters::encode_stream(&content, &entries)?;
        Ok(StreamObject {
            entries,
            encoded,
            decoded: Decoded::Data(content),
        })
    }
}

/// PDF object values.
///
/// This is the complete set of primitive objects that can appear in a PDF
/// file body. References replace `N G R` triplets during parsing and only
/// ever appear inside containers; streams only ever appear as the body of
/// an indirect-object definition.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFObject {
    /// Null value
    Null,

    /// Boolean value
    Boolean(bool),

    /// Integer value
    Integer(i64),

    /// Real value
    Real(f64),

    /// Name, stored with its leading slash (e.g. "/Type")
    Name(String),

    /// Literal string (from `(hello)`), escape sequences resolved
    LiteralString(Vec<u8>),

    /// Hex string (from `<48656c6c6f>`), nibbles resolved
    HexString(Vec<u8>),

    /// Array of objects
    Array(Vec<PDFObject>),

    /// Dictionary (ordered key-value pairs)
    Dictionary(Dict),

    /// Indirect object reference (like `5 0 R`)
    Reference { num: u32, gen: u16 },

    /// Stream (dictionary + raw and decoded bytes)
    Stream(StreamObject),
}

impl PDFObject {
    /// Returns true if this object is null.
    pub fn is_null(&self) -> bool {
        matches!(self, PDFObject::Null)
    }

    /// Returns the integer value, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PDFObject::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the numeric value as f64, coercing integers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PDFObject::Integer(i) => Some(*i as f64),
            PDFObject::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns the name (with its leading slash), if any.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            PDFObject::Name(n) => Some(n),
            _ => None,
        }
    }

    /// Returns the string bytes for either string flavor.
    pub fn as_string_bytes(&self) -> Option<&[u8]> {
        match self {
            PDFObject::LiteralString(b) | PDFObject::HexString(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the array items, if any.
    pub fn as_array(&self) -> Option<&[PDFObject]> {
        match self {
            PDFObject::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the dictionary, if this is a dictionary or a stream.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            PDFObject::Dictionary(d) => Some(d),
            PDFObject::Stream(s) => Some(&s.entries),
            _ => None,
        }
    }

    /// Mutable access to the dictionary of a dictionary or stream.
    pub fn as_dict_mut(&mut self) -> Option<&mut Dict> {
        match self {
            PDFObject::Dictionary(d) => Some(d),
            PDFObject::Stream(s) => Some(&mut s.entries),
            _ => None,
        }
    }

    /// Returns `(num, gen)` if this is an indirect reference.
    pub fn as_reference(&self) -> Option<(u32, u16)> {
        match self {
            PDFObject::Reference { num, gen } => Some((*num, *gen)),
            _ => None,
        }
    }

    /// Returns the stream, if any.
    pub fn as_stream(&self) -> Option<&StreamObject> {
        match self {
            PDFObject::Stream(s) => Some(s),
            _ => None,
        }
    }

    /// Builds a reference value.
    pub fn reference(num: u32) -> PDFObject {
        PDFObject::Reference { num, gen: 0 }
    }

    /// Builds a name value, adding the leading slash if missing.
    pub fn name(n: &str) -> PDFObject {
        if n.starts_with('/') {
            PDFObject::Name(n.to_string())
        } else {
            PDFObject::Name(format!("/{}", n))
        }
    }
}

/// Serializes a name, hex-escaping bytes a reader could misparse.
fn write_name(out: &mut Vec<u8>, name: &str) {
    out.push(b'/');
    let body = name.strip_prefix('/').unwrap_or(name);
    for &b in body.as_bytes() {
        let special = matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#'
        );
        if special || !(0x21..=0x7e).contains(&b) {
            out.push(b'#');
            out.extend_from_slice(format!("{:02X}", b).as_bytes());
        } else {
            out.push(b);
        }
    }
}

/// Serializes a literal string, escaping backslash, parens and CR.
fn write_literal_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');
    for &b in bytes {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'(' => out.extend_from_slice(b"\\("),
            b')' => out.extend_from_slice(b"\\)"),
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(b),
        }
    }
    out.push(b')');
}

fn write_real(out: &mut Vec<u8>, r: f64) {
    if r.fract() == 0.0 && r.abs() < 1e15 {
        // Keep the decimal point so the value reads back as a real
        out.extend_from_slice(format!("{:.1}", r).as_bytes());
    } else {
        out.extend_from_slice(format!("{}", r).as_bytes());
    }
}

/// Appends the serialized form of `obj` to `out`.
pub fn write_object(out: &mut Vec<u8>, obj: &PDFObject) -> PDFResult<()> {
    let mut itoa_buf = itoa::Buffer::new();
    match obj {
        PDFObject::Null => out.extend_from_slice(b"null"),
        PDFObject::Boolean(true) => out.extend_from_slice(b"true"),
        PDFObject::Boolean(false) => out.extend_from_slice(b"false"),
        PDFObject::Integer(i) => out.extend_from_slice(itoa_buf.format(*i).as_bytes()),
        PDFObject::Real(r) => write_real(out, *r),
        PDFObject::Name(n) => write_name(out, n),
        PDFObject::LiteralString(s) => write_literal_string(out, s),
        PDFObject::HexString(s) => {
            out.push(b'<');
            for b in s {
                out.extend_from_slice(format!("{:02X}", b).as_bytes());
            }
            out.push(b'>');
        }
        PDFObject::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_object(out, item)?;
            }
            out.push(b']');
        }
        PDFObject::Dictionary(dict) => write_dict(out, dict)?,
        PDFObject::Reference { num, gen } => {
            out.extend_from_slice(itoa_buf.format(*num).as_bytes());
            out.push(b' ');
            out.extend_from_slice(itoa_buf.format(*gen).as_bytes());
            out.extend_from_slice(b" R");
        }
        PDFObject::Stream(stream) => {
            // Re-run the encoder; /Length always reflects the encoded size
            let encoded = match &stream.decoded {
                Decoded::Data(content) => filters::encode_stream(content, &stream.entries)?,
                Decoded::Failed(_) => stream.encoded.clone(),
            };
            let mut entries = stream.entries.clone();
            entries.insert("/Length".to_string(), PDFObject::Integer(encoded.len() as i64));
            write_dict(out, &entries)?;
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(&encoded);
            out.extend_from_slice(b"\nendstream");
        }
    }
    Ok(())
}

fn write_dict(out: &mut Vec<u8>, dict: &Dict) -> PDFResult<()> {
    out.extend_from_slice(b"<< ");
    for (key, value) in dict {
        write_name(out, key);
        out.push(b' ');
        write_object(out, value)?;
        out.push(b' ');
    }
    out.extend_from_slice(b">>");
    Ok(())
}

/// Serializes an object to bytes.
pub fn serialize(obj: &PDFObject) -> PDFResult<Vec<u8>> {
    let mut out = Vec::new();
    write_object(&mut out, obj)?;
    Ok(out)
}

/// Builds the full indirect-object block `N G obj … endobj`.
pub fn serialize_fragment(num: u32, gen: u16, obj: &PDFObject) -> PDFResult<Vec<u8>> {
    let mut itoa_buf = itoa::Buffer::new();
    let mut out = Vec::new();
    out.extend_from_slice(itoa_buf.format(num).as_bytes());
    out.push(b' ');
    out.extend_from_slice(itoa_buf.format(gen).as_bytes());
    out.extend_from_slice(b" obj\n");
    write_object(&mut out, obj)?;
    out.extend_from_slice(b"\nendobj\n");
    Ok(out)
}
