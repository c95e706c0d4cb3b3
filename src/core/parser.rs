use super::error::{PDFError, PDFResult};
use super::filters;
use super::lexer::{self, expect_token, next_token, Token, TokenKind};
use super::object::{Dict, PDFObject, StreamObject};
use log::warn;

/// Returns the raw bytes of a token.
fn token_bytes<'a>(data: &'a [u8], token: &Token) -> &'a [u8] {
    &data[token.start..token.end]
}

/// Parses an integer token.
fn parse_int(data: &[u8], token: &Token) -> PDFResult<i64> {
    let text = std::str::from_utf8(token_bytes(data, token))
        .map_err(|_| PDFError::parse(token.start, "non-ASCII number"))?;
    let text = text.strip_prefix('+').unwrap_or(text);
    text.parse::<i64>()
        .map_err(|_| PDFError::parse(token.start, format!("malformed integer '{}'", text)))
}

/// Parses a real token.
fn parse_real(data: &[u8], token: &Token) -> PDFResult<f64> {
    let text = std::str::from_utf8(token_bytes(data, token))
        .map_err(|_| PDFError::parse(token.start, "non-ASCII number"))?;
    let text = text.strip_prefix('+').unwrap_or(text);
    text.parse::<f64>()
        .map_err(|_| PDFError::parse(token.start, format!("malformed real '{}'", text)))
}

/// Decodes a name token, resolving `#XX` escapes. The leading slash is
/// kept as part of the name.
fn decode_name(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push(((hi << 4) | lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Resolves the escape sequences of a literal string body.
fn unescape_literal(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        i += 1;
        if i >= bytes.len() {
            break;
        }
        match bytes[i] {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'\\' | b'(' | b')' => out.push(bytes[i]),
            b'0'..=b'7' => {
                // Octal escape, up to three digits
                let mut value = (bytes[i] - b'0') as u32;
                let mut digits = 1;
                while digits < 3 && i + 1 < bytes.len() && (b'0'..=b'7').contains(&bytes[i + 1]) {
                    i += 1;
                    digits += 1;
                    value = (value << 3) | (bytes[i] - b'0') as u32;
                }
                out.push(value as u8);
            }
            0x0A => {} // line continuation
            0x0D => {
                // CR or CRLF continuation
                if bytes.get(i + 1) == Some(&0x0A) {
                    i += 1;
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    out
}

/// Decodes the nibbles of a hex string body. Invalid digits are skipped
/// with a warning; an odd final nibble is padded with 0.
fn decode_hex_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() / 2);
    let mut first: Option<u8> = None;
    for &b in bytes {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => {
                if !lexer::is_whitespace(b) {
                    warn!("skipping invalid hex digit 0x{:02x} in string", b);
                }
                continue;
            }
        };
        match first.take() {
            None => first = Some(digit),
            Some(hi) => out.push((hi << 4) | digit),
        }
    }
    if let Some(hi) = first {
        out.push(hi << 4);
    }
    out
}

/// Converts a non-container token into its object value.
fn parse_token_value(data: &[u8], token: &Token) -> PDFResult<PDFObject> {
    match token.kind {
        TokenKind::Integer => Ok(PDFObject::Integer(parse_int(data, token)?)),
        TokenKind::Real => Ok(PDFObject::Real(parse_real(data, token)?)),
        TokenKind::True => Ok(PDFObject::Boolean(true)),
        TokenKind::False => Ok(PDFObject::Boolean(false)),
        TokenKind::Null => Ok(PDFObject::Null),
        TokenKind::Name => Ok(PDFObject::Name(decode_name(token_bytes(data, token)))),
        TokenKind::LiteralString => Ok(PDFObject::LiteralString(unescape_literal(
            &data[token.start + 1..token.end - 1],
        ))),
        TokenKind::HexString => Ok(PDFObject::HexString(decode_hex_string(
            &data[token.start + 1..token.end - 1],
        ))),
        TokenKind::Array => Ok(PDFObject::Array(parse_array_items(
            data,
            token.start + 1,
            token.end - 1,
        )?)),
        TokenKind::Dict => Ok(PDFObject::Dictionary(parse_dict(data, token)?)),
        TokenKind::Keyword => {
            warn!(
                "unexpected keyword '{}' treated as null",
                String::from_utf8_lossy(token_bytes(data, token))
            );
            Ok(PDFObject::Null)
        }
        TokenKind::Stream | TokenKind::Comment => Err(PDFError::parse(
            token.start,
            "stream or comment in value position",
        )),
    }
}

/// Tokenizes the interior of a container and converts the children,
/// collapsing every `int int R` triple into an indirect reference.
fn parse_container_items(data: &[u8], from: usize, to: usize) -> PDFResult<Vec<PDFObject>> {
    let slice = &data[..to];
    let mut tokens: Vec<Token> = Vec::new();
    let mut pos = from;
    while let Some(token) = next_token(slice, pos)? {
        pos = token.end;
        if token.kind == TokenKind::Comment {
            continue;
        }
        tokens.push(token);
    }

    let mut items = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let is_ref = i + 2 < tokens.len()
            && tokens[i].kind == TokenKind::Integer
            && tokens[i + 1].kind == TokenKind::Integer
            && tokens[i + 2].kind == TokenKind::Keyword
            && token_bytes(data, &tokens[i + 2]) == b"R";
        if is_ref {
            let num = parse_int(data, &tokens[i])?;
            let gen = parse_int(data, &tokens[i + 1])?;
            if num >= 0 && gen >= 0 {
                items.push(PDFObject::Reference {
                    num: num as u32,
                    gen: gen as u16,
                });
                i += 3;
                continue;
            }
        }
        items.push(parse_token_value(data, &tokens[i])?);
        i += 1;
    }
    Ok(items)
}

fn parse_array_items(data: &[u8], from: usize, to: usize) -> PDFResult<Vec<PDFObject>> {
    parse_container_items(data, from, to)
}

/// Parses a dictionary token into ordered entries.
///
/// Children are tokenized left to right, then paired right to left so a
/// forward-built association list still reads correctly; a leftover
/// unpaired item at the front is dropped with a warning.
pub fn parse_dict(data: &[u8], token: &Token) -> PDFResult<Dict> {
    let items = parse_container_items(data, token.start + 2, token.end - 2)?;
    let mut pairs: Vec<(String, PDFObject)> = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter().rev();
    loop {
        let Some(value) = iter.next() else { break };
        let Some(key) = iter.next() else {
            warn!("dictionary at offset {} has an unpaired item", token.start);
            break;
        };
        match key {
            PDFObject::Name(name) => pairs.push((name, value)),
            other => {
                warn!(
                    "dictionary at offset {} has a non-name key {:?}",
                    token.start, other
                );
            }
        }
    }
    pairs.reverse();
    let mut dict = Dict::with_capacity(pairs.len());
    for (key, value) in pairs {
        dict.insert(key, value);
    }
    Ok(dict)
}

/// Locates `endstream` at `pos`, tolerating the optional preceding EOL.
fn endstream_after(data: &[u8], pos: usize) -> Option<usize> {
    for skip in [0usize, 1, 2] {
        let p = pos + skip;
        if p + 9 <= data.len() && &data[p..p + 9] == b"endstream" {
            // Only EOL bytes may sit between the content and the keyword
            if data[pos..p].iter().all(|&b| b == 0x0A || b == 0x0D) {
                return Some(p);
            }
        }
    }
    None
}

/// Builds a stream object from its dictionary and `Stream` token.
///
/// A direct `/Length` wins over the balanced scan when it leads to a
/// valid `endstream`, which protects binary content that happens to
/// contain the keyword.
fn parse_stream_object(
    data: &[u8],
    entries: Dict,
    token: &Token,
) -> PDFResult<(PDFObject, usize)> {
    let (scan_start, scan_end) = lexer::stream_content_range(data, token);
    let mut content_end = scan_end;
    let mut end = token.end;
    if let Some(length) = entries.get("/Length").and_then(|o| o.as_int()) {
        if length >= 0 {
            let cand = scan_start + length as usize;
            if cand <= data.len() {
                if let Some(kw) = endstream_after(data, cand) {
                    content_end = cand;
                    end = kw + 9;
                }
            }
        }
    }
    let encoded = data[scan_start..content_end].to_vec();
    let decoded = filters::decode_stream(&encoded, &entries);
    Ok((
        PDFObject::Stream(StreamObject {
            entries,
            encoded,
            decoded,
        }),
        end,
    ))
}

/// Parses one object starting at `pos`, returning it together with the
/// offset just past its last token.
pub fn parse_object_at(data: &[u8], pos: usize) -> PDFResult<(PDFObject, usize)> {
    let mut pos = pos;
    loop {
        let token = expect_token(data, pos)?;
        match token.kind {
            TokenKind::Comment => {
                pos = token.end;
            }
            TokenKind::Dict => {
                // A dictionary directly followed by stream data is a stream
                if let Some(next) = next_token(data, token.end)? {
                    if next.kind == TokenKind::Stream {
                        let entries = parse_dict(data, &token)?;
                        return parse_stream_object(data, entries, &next);
                    }
                }
                return Ok((PDFObject::Dictionary(parse_dict(data, &token)?), token.end));
            }
            _ => return Ok((parse_token_value(data, &token)?, token.end)),
        }
    }
}

/// Parses one object starting at `pos`.
pub fn parse_object(data: &[u8], pos: usize) -> PDFResult<PDFObject> {
    Ok(parse_object_at(data, pos)?.0)
}

/// Parses an indirect-object definition `N G obj … endobj` at `pos`.
///
/// Returns `(num, gen, object, end)` where `end` is the offset just past
/// `endobj`.
pub fn parse_indirect_object(data: &[u8], pos: usize) -> PDFResult<(u32, u16, PDFObject, usize)> {
    let num_token = expect_token(data, pos)?;
    if num_token.kind != TokenKind::Integer {
        return Err(PDFError::parse(num_token.start, "expected object number"));
    }
    let num = parse_int(data, &num_token)?;
    let gen_token = expect_token(data, num_token.end)?;
    if gen_token.kind != TokenKind::Integer {
        return Err(PDFError::parse(gen_token.start, "expected generation number"));
    }
    let gen = parse_int(data, &gen_token)?;
    let kw = expect_token(data, gen_token.end)?;
    if token_bytes(data, &kw) != b"obj" {
        return Err(PDFError::parse(kw.start, "expected 'obj' keyword"));
    }
    let (object, body_end) = parse_object_at(data, kw.end)?;
    let end = match next_token(data, body_end)? {
        Some(t) if token_bytes(data, &t) == b"endobj" => t.end,
        Some(t) => {
            warn!("object {} missing endobj at offset {}", num, t.start);
            body_end
        }
        None => body_end,
    };
    Ok((num as u32, gen as u16, object, end))
}

/// Extracts every embedded object of a `/Type /ObjStm` stream.
///
/// The decoded content starts with `/N` pairs of `obj_num offset`
/// integers; offsets are relative to `/First`.
pub fn parse_objstm(stream: &StreamObject) -> PDFResult<Vec<(u32, PDFObject)>> {
    let content = stream.decoded.data().ok_or_else(|| {
        PDFError::filter(
            "/ObjStm".to_string(),
            "object stream content failed to decode".to_string(),
        )
    })?;
    let n = stream
        .entries
        .get("/N")
        .and_then(|o| o.as_int())
        .ok_or_else(|| PDFError::parse(0, "object stream missing /N"))? as usize;
    let first = stream
        .entries
        .get("/First")
        .and_then(|o| o.as_int())
        .ok_or_else(|| PDFError::parse(0, "object stream missing /First"))? as usize;
    if first > content.len() {
        return Err(PDFError::parse(0, "object stream /First past content end"));
    }

    let header = &content[..first];
    let mut pairs = Vec::with_capacity(n);
    let mut pos = 0;
    for _ in 0..n {
        let num_token = expect_token(header, pos)?;
        let num = parse_int(header, &num_token)?;
        let off_token = expect_token(header, num_token.end)?;
        let off = parse_int(header, &off_token)?;
        pos = off_token.end;
        pairs.push((num as u32, off as usize));
    }

    let mut objects = Vec::with_capacity(n);
    for (num, off) in pairs {
        let at = first + off;
        if at >= content.len() {
            return Err(PDFError::parse(at, "embedded object offset past content"));
        }
        objects.push((num, parse_object(content, at)?));
    }
    Ok(objects)
}
