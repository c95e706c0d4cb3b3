use encoding_rs::UTF_16BE;

/// PDFDocEncoding positions 0x80..0xA0, where it departs from Latin-1.
const PDFDOC_HIGH: [char; 32] = [
    '\u{2022}', '\u{2020}', '\u{2021}', '\u{2026}', '\u{2014}', '\u{2013}', '\u{0192}',
    '\u{2044}', '\u{2039}', '\u{203A}', '\u{2212}', '\u{2030}', '\u{201E}', '\u{201C}',
    '\u{201D}', '\u{2018}', '\u{2019}', '\u{201A}', '\u{2122}', '\u{FB01}', '\u{FB02}',
    '\u{0141}', '\u{0152}', '\u{0160}', '\u{0178}', '\u{017D}', '\u{0131}', '\u{0142}',
    '\u{0153}', '\u{0161}', '\u{017E}', '\u{FFFD}',
];

/// Decodes a PDF text string: UTF-16BE when it starts with a byte order
/// mark, PDFDocEncoding otherwise.
pub fn text_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let (text, _, _) = UTF_16BE.decode(&bytes[2..]);
        return text.into_owned();
    }
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => PDFDOC_HIGH[(b - 0x80) as usize],
            0xA0 => '\u{20AC}', // Euro sign, the other departure from Latin-1
            _ => b as char,
        })
        .collect()
}
