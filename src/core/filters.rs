use super::error::{PDFError, PDFResult};
use super::object::{Decoded, Dict, PDFObject};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::warn;
use smallvec::SmallVec;
use std::io::{Read, Write};

/// Filters this pipeline can both decode and encode.
pub const DECODED_FILTERS: &[&str] = &["/FlateDecode", "/ASCIIHexDecode", "/ASCII85Decode"];

/// One pipeline stage: filter name plus its decode parameters.
type Stage = (String, Option<Dict>);

/// Extracts the ordered filter pipeline from a stream dictionary.
///
/// `/Filter` may be a single name or an array of names; `/DecodeParms`
/// pairs up with it (a single dictionary or an array with nulls for
/// stages that take no parameters).
fn filter_pipeline(entries: &Dict) -> SmallVec<[Stage; 2]> {
    let mut stages: SmallVec<[Stage; 2]> = SmallVec::new();
    let names: SmallVec<[String; 2]> = match entries.get("/Filter") {
        Some(PDFObject::Name(n)) => SmallVec::from_elem(n.clone(), 1),
        Some(PDFObject::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_name().map(|n| n.to_string()))
            .collect(),
        _ => SmallVec::new(),
    };
    let parms: Vec<Option<Dict>> = match entries.get("/DecodeParms") {
        Some(PDFObject::Dictionary(d)) => vec![Some(d.clone())],
        Some(PDFObject::Array(items)) => items
            .iter()
            .map(|o| match o {
                PDFObject::Dictionary(d) => Some(d.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    for (i, name) in names.into_iter().enumerate() {
        stages.push((name, parms.get(i).cloned().flatten()));
    }
    stages
}

/// Decodes a FlateDecode (zlib/deflate) compressed buffer.
pub fn flate_decode(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PDFError::filter("/FlateDecode".into(), format!("{}", e)))?;
    Ok(out)
}

/// Encodes a buffer with FlateDecode (zlib/deflate).
pub fn flate_encode(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| PDFError::filter("/FlateDecode".into(), format!("{}", e)))
}

/// Reverses the PNG row predictor on predictor-encoded data.
///
/// Each row is one filter-type byte followed by the row data. Row filters
/// 0 (None), 1 (Sub) and 2 (Up, the one the canonical toolchain emits as
/// predictor 12) are supported.
pub fn png_predictor_decode(
    data: &[u8],
    colors: usize,
    bits_per_component: usize,
    columns: usize,
) -> PDFResult<Vec<u8>> {
    let row_len = (columns * colors * bits_per_component).div_ceil(8);
    let bpp = (colors * bits_per_component).div_ceil(8).max(1);
    let mut out = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_len];
    let mut i = 0;
    while i < data.len() {
        let filter_type = data[i];
        let row_end = (i + 1 + row_len).min(data.len());
        let mut row = data[i + 1..row_end].to_vec();
        match filter_type {
            0 => {}
            1 => {
                // Sub: add the byte one pixel to the left
                for j in bpp..row.len() {
                    row[j] = row[j].wrapping_add(row[j - bpp]);
                }
            }
            2 => {
                // Up: add the byte from the previous row
                for j in 0..row.len() {
                    row[j] = row[j].wrapping_add(prev_row[j]);
                }
            }
            other => {
                return Err(PDFError::filter(
                    "/FlateDecode".into(),
                    format!("unsupported PNG row filter {}", other),
                ))
            }
        }
        out.extend_from_slice(&row);
        prev_row = row;
        i += 1 + row_len;
    }
    Ok(out)
}

/// Applies the `/DecodeParms` post-processing after a Flate stage.
fn apply_decode_parms(data: Vec<u8>, parms: &Dict) -> PDFResult<Vec<u8>> {
    let predictor = parms
        .get("/Predictor")
        .and_then(|o| o.as_int())
        .unwrap_or(1);
    if predictor == 1 {
        return Ok(data);
    }
    if predictor < 10 {
        return Err(PDFError::filter(
            "/FlateDecode".into(),
            format!("unsupported predictor {}", predictor),
        ));
    }
    let columns = parms.get("/Columns").and_then(|o| o.as_int()).unwrap_or(1) as usize;
    let colors = parms.get("/Colors").and_then(|o| o.as_int()).unwrap_or(1) as usize;
    let bpc = parms
        .get("/BitsPerComponent")
        .and_then(|o| o.as_int())
        .unwrap_or(8) as usize;
    png_predictor_decode(&data, colors, bpc, columns)
}

/// Decodes an ASCIIHex buffer: whitespace-tolerant, case-insensitive,
/// terminated by `>`. An odd final nibble is padded with 0.
pub fn asciihex_decode(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut first: Option<u8> = None;
    for &b in data {
        if super::lexer::is_whitespace(b) {
            continue;
        }
        if b == b'>' {
            break;
        }
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => {
                return Err(PDFError::filter(
                    "/ASCIIHexDecode".into(),
                    format!("invalid hex digit 0x{:02x}", b),
                ))
            }
        };
        match first.take() {
            None => first = Some(digit),
            Some(hi) => out.push((hi << 4) | digit),
        }
    }
    if let Some(hi) = first {
        warn!("odd number of hex digits, padding final nibble with 0");
        out.push(hi << 4);
    }
    Ok(out)
}

/// Encodes a buffer as ASCIIHex (uppercase, with the `>` terminator).
pub fn asciihex_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2 + 1);
    for b in data {
        out.extend_from_slice(format!("{:02X}", b).as_bytes());
    }
    out.push(b'>');
    out
}

/// Decodes an ASCII85 buffer with Adobe framing: an optional leading
/// `<~`, the `~>` terminator, and the `z` short form for zero groups.
pub fn ascii85_decode(data: &[u8]) -> PDFResult<Vec<u8>> {
    let err = |reason: String| PDFError::filter("/ASCII85Decode".to_string(), reason);
    let mut i = 0;
    while i < data.len() && super::lexer::is_whitespace(data[i]) {
        i += 1;
    }
    if data[i..].starts_with(b"<~") {
        i += 2;
    }
    let mut out = Vec::new();
    let mut group = [0u8; 5];
    let mut count = 0usize;
    while i < data.len() {
        let b = data[i];
        i += 1;
        if super::lexer::is_whitespace(b) {
            continue;
        }
        if b == b'~' {
            break;
        }
        if b == b'z' {
            if count != 0 {
                return Err(err("z inside ASCII85 group".into()));
            }
            out.extend_from_slice(&[0, 0, 0, 0]);
            continue;
        }
        if !(b'!'..=b'u').contains(&b) {
            return Err(err(format!("invalid ASCII85 byte 0x{:02x}", b)));
        }
        group[count] = b - b'!';
        count += 1;
        if count == 5 {
            let mut value: u64 = 0;
            for g in group {
                value = value * 85 + g as u64;
            }
            if value > 0xFFFF_FFFF {
                return Err(err("ASCII85 group overflow".into()));
            }
            out.extend_from_slice(&(value as u32).to_be_bytes());
            count = 0;
        }
    }
    // A missing ~> terminator is tolerated
    if count == 1 {
        return Err(err("truncated ASCII85 group".into()));
    }
    if count >= 2 {
        // Partial final group: pad with 'u' and keep count-1 bytes
        let kept = count - 1;
        for slot in group.iter_mut().skip(count) {
            *slot = b'u' - b'!';
        }
        let mut value: u64 = 0;
        for g in group {
            value = value * 85 + g as u64;
        }
        if value > 0xFFFF_FFFF {
            return Err(err("ASCII85 group overflow".into()));
        }
        out.extend_from_slice(&(value as u32).to_be_bytes()[..kept]);
    }
    Ok(out)
}

/// Encodes a buffer as ASCII85 with Adobe framing.
pub fn ascii85_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 5 / 4 + 4);
    out.extend_from_slice(b"<~");
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let value = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if value == 0 {
            out.push(b'z');
            continue;
        }
        let mut digits = [0u8; 5];
        let mut v = value;
        for d in digits.iter_mut().rev() {
            *d = (v % 85) as u8 + b'!';
            v /= 85;
        }
        out.extend_from_slice(&digits);
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let mut padded = [0u8; 4];
        padded[..rest.len()].copy_from_slice(rest);
        let value = u32::from_be_bytes(padded);
        let mut digits = [0u8; 5];
        let mut v = value;
        for d in digits.iter_mut().rev() {
            *d = (v % 85) as u8 + b'!';
            v /= 85;
        }
        out.extend_from_slice(&digits[..rest.len() + 1]);
    }
    out.extend_from_slice(b"~>");
    out
}

/// Runs the decode pipeline of a stream dictionary over its raw bytes.
///
/// Failures do not abort parsing: the result is a tagged `Decoded::Failed`
/// carrying the reason, so broken files stay introspectable.
pub fn decode_stream(encoded: &[u8], entries: &Dict) -> Decoded {
    let stages = filter_pipeline(entries);
    let mut data = encoded.to_vec();
    for (name, parms) in &stages {
        let result = match name.as_str() {
            "/FlateDecode" => flate_decode(&data).and_then(|d| match parms {
                Some(p) => apply_decode_parms(d, p),
                None => Ok(d),
            }),
            "/ASCIIHexDecode" => asciihex_decode(&data),
            "/ASCII85Decode" => ascii85_decode(&data),
            other => Err(PDFError::filter(
                other.to_string(),
                "unsupported filter".to_string(),
            )),
        };
        match result {
            Ok(d) => data = d,
            Err(e) => {
                warn!("stream decode failed: {}", e);
                return Decoded::Failed(format!("{}", e));
            }
        }
    }
    Decoded::Data(data)
}

/// Runs the encode pipeline of a stream dictionary over plain content.
///
/// Stages apply in reverse of the decode order so that
/// `decode(encode(bytes)) == bytes` for any supported pipeline. Predictors
/// are never applied on the encode side. Unlike decoding, an encode
/// failure is fatal.
pub fn encode_stream(content: &[u8], entries: &Dict) -> PDFResult<Vec<u8>> {
    let stages = filter_pipeline(entries);
    let mut data = content.to_vec();
    for (name, _) in stages.iter().rev() {
        data = match name.as_str() {
            "/FlateDecode" => flate_encode(&data)?,
            "/ASCIIHexDecode" => asciihex_encode(&data),
            "/ASCII85Decode" => ascii85_encode(&data),
            other => {
                return Err(PDFError::filter(
                    other.to_string(),
                    "unsupported filter".to_string(),
                ))
            }
        };
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict_with_filter(name: &str) -> Dict {
        let mut d = Dict::new();
        d.insert("/Filter".into(), PDFObject::Name(name.into()));
        d
    }

    #[test]
    fn test_flate_round_trip() {
        let original = b"Hello, PDF world! This is test data.";
        let compressed = flate_encode(original).unwrap();
        let decompressed = flate_decode(&compressed).unwrap();
        assert_eq!(&decompressed[..], original);
    }

    #[test]
    fn test_asciihex_decode() {
        assert_eq!(asciihex_decode(b"48656c6c6f>").unwrap(), b"Hello".to_vec());
        assert_eq!(asciihex_decode(b"48 65 6C 6C 6F>").unwrap(), b"Hello".to_vec());
        // Odd number of digits pads the final nibble with zero
        assert_eq!(asciihex_decode(b"4>").unwrap(), vec![0x40]);
    }

    #[test]
    fn test_asciihex_invalid() {
        assert!(asciihex_decode(b"4g>").is_err());
    }

    #[test]
    fn test_asciihex_round_trip() {
        let data = vec![0u8, 1, 2, 254, 255];
        assert_eq!(asciihex_decode(&asciihex_encode(&data)).unwrap(), data);
    }

    #[test]
    fn test_ascii85_round_trip() {
        let data = b"Man is distinguished, not only by his reason".to_vec();
        assert_eq!(ascii85_decode(&ascii85_encode(&data)).unwrap(), data);
    }

    #[test]
    fn test_ascii85_zero_group() {
        let data = vec![0u8; 8];
        let encoded = ascii85_encode(&data);
        assert_eq!(encoded, b"<~zz~>".to_vec());
        assert_eq!(ascii85_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_ascii85_partial_group() {
        for n in 1..=7usize {
            let data: Vec<u8> = (0..n as u8).collect();
            assert_eq!(ascii85_decode(&ascii85_encode(&data)).unwrap(), data);
        }
    }

    #[test]
    fn test_ascii85_without_adobe_prefix() {
        let data = b"sure.".to_vec();
        let mut encoded = ascii85_encode(&data);
        // Strip the <~ prefix; the decoder tolerates its absence
        encoded.drain(..2);
        assert_eq!(ascii85_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_png_predictor_up() {
        // Two rows of 3 columns, both rows filter type 2 (Up)
        let data = vec![
            2, 10, 20, 30, // row 1: prev row is zeros
            2, 1, 1, 1, // row 2: adds row 1
        ];
        let decoded = png_predictor_decode(&data, 1, 8, 3).unwrap();
        assert_eq!(decoded, vec![10, 20, 30, 11, 21, 31]);
    }

    #[test]
    fn test_png_predictor_none_and_sub() {
        let data = vec![
            0, 5, 6, // None
            1, 7, 3, // Sub: 7, 7+3
        ];
        let decoded = png_predictor_decode(&data, 1, 8, 2).unwrap();
        assert_eq!(decoded, vec![5, 6, 7, 10]);
    }

    #[test]
    fn test_decode_stream_flate() {
        let entries = dict_with_filter("/FlateDecode");
        let encoded = flate_encode(b"content").unwrap();
        assert_eq!(
            decode_stream(&encoded, &entries),
            Decoded::Data(b"content".to_vec())
        );
    }

    #[test]
    fn test_decode_stream_with_predictor() {
        let mut entries = dict_with_filter("/FlateDecode");
        let mut parms = Dict::new();
        parms.insert("/Predictor".into(), PDFObject::Integer(12));
        parms.insert("/Columns".into(), PDFObject::Integer(3));
        entries.insert("/DecodeParms".into(), PDFObject::Dictionary(parms));

        let predicted = vec![2u8, 10, 20, 30, 2, 1, 1, 1];
        let encoded = flate_encode(&predicted).unwrap();
        assert_eq!(
            decode_stream(&encoded, &entries),
            Decoded::Data(vec![10, 20, 30, 11, 21, 31])
        );
    }

    #[test]
    fn test_decode_stream_no_filter() {
        let entries = Dict::new();
        assert_eq!(
            decode_stream(b"as-is", &entries),
            Decoded::Data(b"as-is".to_vec())
        );
    }

    #[test]
    fn test_decode_stream_unsupported_filter() {
        let entries = dict_with_filter("/DCTDecode");
        match decode_stream(b"jpeg data", &entries) {
            Decoded::Failed(reason) => assert!(reason.contains("/DCTDecode")),
            Decoded::Data(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn test_decode_stream_corrupt_flate() {
        let entries = dict_with_filter("/FlateDecode");
        assert!(matches!(
            decode_stream(b"not zlib at all", &entries),
            Decoded::Failed(_)
        ));
    }

    #[test]
    fn test_encode_stream_unsupported_is_fatal() {
        let entries = dict_with_filter("/LZWDecode");
        assert!(encode_stream(b"data", &entries).is_err());
    }

    #[test]
    fn test_pipeline_round_trip() {
        // /Filter [/ASCII85Decode /FlateDecode]: decode applies A85 then
        // Flate, so encode must run Flate first, then A85.
        let mut entries = Dict::new();
        entries.insert(
            "/Filter".into(),
            PDFObject::Array(vec![
                PDFObject::Name("/ASCII85Decode".into()),
                PDFObject::Name("/FlateDecode".into()),
            ]),
        );
        let content = b"pipeline round trip content".to_vec();
        let encoded = encode_stream(&content, &entries).unwrap();
        assert_eq!(decode_stream(&encoded, &entries), Decoded::Data(content));
    }
}
