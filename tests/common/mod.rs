//! Synthetic PDF fixtures for the integration suites.
//!
//! Every builder assembles its bytes sequentially and records offsets as
//! it goes, so the cross-reference data is correct by construction.
#![allow(dead_code)]

use pdf_delta::core::filters::asciihex_encode;

/// Serializes a dictionary literal the quick way for fixtures.
fn dict_bytes(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut out = b"<< ".to_vec();
    for (key, value) in pairs {
        out.extend_from_slice(key.as_bytes());
        out.push(b' ');
        out.extend_from_slice(value.as_bytes());
        out.push(b' ');
    }
    out.extend_from_slice(b">>");
    out
}

fn push_object(data: &mut Vec<u8>, num: u32, body: &[u8]) -> usize {
    let at = data.len();
    data.extend_from_slice(format!("{} 0 obj\n", num).as_bytes());
    data.extend_from_slice(body);
    data.extend_from_slice(b"\nendobj\n");
    at
}

fn push_classic_xref(data: &mut Vec<u8>, offsets: &[(u32, usize)], trailer: &[u8]) -> usize {
    let at = data.len();
    data.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n");
    for (num, off) in offsets {
        data.extend_from_slice(format!("{} 1\n{:010} 00000 n \n", num, off).as_bytes());
    }
    data.extend_from_slice(b"trailer\n");
    data.extend_from_slice(trailer);
    data.push(b'\n');
    at
}

/// The minimal one-page document: catalog, page tree, one US Letter page.
pub fn minimal_pdf() -> Vec<u8> {
    let mut data = b"%PDF-1.4\n".to_vec();
    let o1 = push_object(
        &mut data,
        1,
        &dict_bytes(&[("/Type", "/Catalog"), ("/Pages", "2 0 R")]),
    );
    let o2 = push_object(
        &mut data,
        2,
        &dict_bytes(&[("/Type", "/Pages"), ("/Kids", "[3 0 R]"), ("/Count", "1")]),
    );
    let o3 = push_object(
        &mut data,
        3,
        &dict_bytes(&[
            ("/Type", "/Page"),
            ("/Parent", "2 0 R"),
            ("/MediaBox", "[0 0 612 792]"),
        ]),
    );
    let xref = push_classic_xref(
        &mut data,
        &[(1, o1), (2, o2), (3, o3)],
        &dict_bytes(&[("/Size", "4"), ("/Root", "1 0 R")]),
    );
    data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());
    data
}

/// Two pages under one /Pages node, plus an /Info dictionary.
pub fn two_page_pdf() -> Vec<u8> {
    let mut data = b"%PDF-1.4\n".to_vec();
    let o1 = push_object(
        &mut data,
        1,
        &dict_bytes(&[("/Type", "/Catalog"), ("/Pages", "2 0 R")]),
    );
    let o2 = push_object(
        &mut data,
        2,
        &dict_bytes(&[
            ("/Type", "/Pages"),
            ("/Kids", "[3 0 R 4 0 R]"),
            ("/Count", "2"),
        ]),
    );
    let o3 = push_object(
        &mut data,
        3,
        &dict_bytes(&[
            ("/Type", "/Page"),
            ("/Parent", "2 0 R"),
            ("/MediaBox", "[0 0 612 792]"),
            ("/Contents", "6 0 R"),
        ]),
    );
    let o4 = push_object(
        &mut data,
        4,
        &dict_bytes(&[
            ("/Type", "/Page"),
            ("/Parent", "2 0 R"),
            ("/MediaBox", "[0 0 595 842]"),
        ]),
    );
    let o5 = push_object(
        &mut data,
        5,
        &dict_bytes(&[("/Title", "(Two pages)"), ("/Author", "(tester)")]),
    );
    let content = b"BT /F1 12 Tf (Hello) Tj ET";
    let o6 = {
        let at = data.len();
        data.extend_from_slice(
            format!("6 0 obj\n<< /Length {} >>\nstream\n", content.len()).as_bytes(),
        );
        data.extend_from_slice(content);
        data.extend_from_slice(b"\nendstream\nendobj\n");
        at
    };
    let xref = push_classic_xref(
        &mut data,
        &[(1, o1), (2, o2), (3, o3), (4, o4), (5, o5), (6, o6)],
        &dict_bytes(&[("/Size", "7"), ("/Root", "1 0 R"), ("/Info", "5 0 R")]),
    );
    data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());
    data
}

/// Hybrid file: a classic table indexing objects 1..3 whose trailer's
/// /XRefStm points at a companion xref stream that also indexes object 4.
pub fn hybrid_pdf() -> Vec<u8> {
    let mut data = b"%PDF-1.4\n".to_vec();
    let o1 = push_object(
        &mut data,
        1,
        &dict_bytes(&[("/Type", "/Catalog"), ("/Pages", "2 0 R")]),
    );
    let o2 = push_object(
        &mut data,
        2,
        &dict_bytes(&[("/Type", "/Pages"), ("/Kids", "[3 0 R]"), ("/Count", "1")]),
    );
    let o3 = push_object(
        &mut data,
        3,
        &dict_bytes(&[
            ("/Type", "/Page"),
            ("/Parent", "2 0 R"),
            ("/MediaBox", "[0 0 612 792]"),
            ("/Extra", "4 0 R"),
        ]),
    );
    let o4 = push_object(&mut data, 4, &dict_bytes(&[("/Hidden", "true")]));

    // Companion xref stream (object 5), W = [1 2 1], objects 4 and 5
    let stm_at = data.len();
    let mut records: Vec<u8> = Vec::new();
    records.push(1);
    records.extend_from_slice(&(o4 as u16).to_be_bytes());
    records.push(0);
    records.push(1);
    records.extend_from_slice(&(stm_at as u16).to_be_bytes());
    records.push(0);
    let encoded = asciihex_encode(&records);
    let mut stream_dict = format!(
        "<< /Type /XRef /Size 6 /W [1 2 1] /Index [4 2] /Root 1 0 R /Filter /ASCIIHexDecode /Length {} >>",
        encoded.len()
    )
    .into_bytes();
    stream_dict.extend_from_slice(b"\nstream\n");
    stream_dict.extend_from_slice(&encoded);
    stream_dict.extend_from_slice(b"\nendstream");
    push_object(&mut data, 5, &stream_dict);

    let trailer = dict_bytes(&[
        ("/Size", "6"),
        ("/Root", "1 0 R"),
        ("/XRefStm", &stm_at.to_string()),
    ]);
    let xref = push_classic_xref(&mut data, &[(1, o1), (2, o2), (3, o3)], &trailer);
    data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());
    data
}

/// A 1.5 file whose objects 6 and 7 live inside an object stream
/// (object 5), indexed by an xref stream (object 4).
pub fn objstm_pdf() -> Vec<u8> {
    let mut data = b"%PDF-1.5\n".to_vec();
    let o1 = push_object(
        &mut data,
        1,
        &dict_bytes(&[("/Type", "/Catalog"), ("/Pages", "2 0 R")]),
    );
    let o2 = push_object(
        &mut data,
        2,
        &dict_bytes(&[("/Type", "/Pages"), ("/Kids", "[3 0 R]"), ("/Count", "1")]),
    );
    let o3 = push_object(
        &mut data,
        3,
        &dict_bytes(&[
            ("/Type", "/Page"),
            ("/Parent", "2 0 R"),
            ("/MediaBox", "[0 0 612 792]"),
            ("/Resources", "<< /Font << /F1 6 0 R >> >>"),
        ]),
    );

    // Object stream holding objects 6 and 7
    let objstm_content = b"6 0 7 10\n<</A 1>>  <</B 2>>".to_vec();
    let first = 9; // length of the "6 0 7 10\n" pair header
    let o5 = {
        let at = data.len();
        data.extend_from_slice(
            format!(
                "5 0 obj\n<< /Type /ObjStm /N 2 /First {} /Length {} >>\nstream\n",
                first,
                objstm_content.len()
            )
            .as_bytes(),
        );
        data.extend_from_slice(&objstm_content);
        data.extend_from_slice(b"\nendstream\nendobj\n");
        at
    };

    // Xref stream (object 4) covering 0..=7
    let xref_at = data.len();
    let mut records: Vec<u8> = Vec::new();
    let add = |records: &mut Vec<u8>, tag: u8, f2: u16, f3: u8| {
        records.push(tag);
        records.extend_from_slice(&f2.to_be_bytes());
        records.push(f3);
    };
    add(&mut records, 0, 0, 255); // 0: free head
    add(&mut records, 1, o1 as u16, 0);
    add(&mut records, 1, o2 as u16, 0);
    add(&mut records, 1, o3 as u16, 0);
    add(&mut records, 1, xref_at as u16, 0); // 4: the xref stream itself
    add(&mut records, 1, o5 as u16, 0);
    add(&mut records, 2, 5, 0); // 6: in object stream 5, ordinal 0
    add(&mut records, 2, 5, 1); // 7: ordinal 1
    let encoded = asciihex_encode(&records);
    let mut stream_body = format!(
        "<< /Type /XRef /Size 8 /W [1 2 1] /Root 1 0 R /Filter /ASCIIHexDecode /Length {} >>",
        encoded.len()
    )
    .into_bytes();
    stream_body.extend_from_slice(b"\nstream\n");
    stream_body.extend_from_slice(&encoded);
    stream_body.extend_from_slice(b"\nendstream");
    push_object(&mut data, 4, &stream_body);

    data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_at).as_bytes());
    data
}

/// Linearized-style layout: a first-page xref near the head whose /Prev
/// points forward at the main xref near the tail.
pub fn linearized_pdf() -> Vec<u8> {
    let mut data = b"%PDF-1.4\n".to_vec();
    let o4 = push_object(
        &mut data,
        4,
        &dict_bytes(&[("/Linearized", "1"), ("/N", "1")]),
    );

    // First-page xref: lists object 4 only; /Prev patched afterwards.
    // The /Prev value is padded to fixed width so offsets stay stable.
    let fp_xref = data.len();
    data.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n");
    data.extend_from_slice(format!("4 1\n{:010} 00000 n \n", o4).as_bytes());
    data.extend_from_slice(b"trailer\n");
    let prev_field = data.len();
    data.extend_from_slice(b"<< /Size 6 /Root 1 0 R /Prev 0000000000 >>\n");

    let o1 = push_object(
        &mut data,
        1,
        &dict_bytes(&[("/Type", "/Catalog"), ("/Pages", "2 0 R")]),
    );
    let o2 = push_object(
        &mut data,
        2,
        &dict_bytes(&[("/Type", "/Pages"), ("/Kids", "[3 0 R]"), ("/Count", "1")]),
    );
    let o3 = push_object(
        &mut data,
        3,
        &dict_bytes(&[
            ("/Type", "/Page"),
            ("/Parent", "2 0 R"),
            ("/MediaBox", "[0 0 612 792]"),
        ]),
    );

    let main_xref = data.len();
    data.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n");
    for (num, off) in [(1u32, o1), (2, o2), (3, o3)] {
        data.extend_from_slice(format!("{} 1\n{:010} 00000 n \n", num, off).as_bytes());
    }
    data.extend_from_slice(b"trailer\n<< /Size 6 /Root 1 0 R >>\n");
    data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", fp_xref).as_bytes());

    // Patch the forward /Prev now that the main xref position is known
    let patch = format!("{:010}", main_xref);
    let field_at = prev_field + b"<< /Size 6 /Root 1 0 R /Prev ".len();
    data[field_at..field_at + 10].copy_from_slice(patch.as_bytes());
    data
}
