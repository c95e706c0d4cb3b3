use super::document::ChangeKind;
use super::error::{PDFError, PDFResult};
use super::object::{serialize, serialize_fragment, PDFObject, StreamObject};
use super::xref::{EntryKind, IndexEntry, RevisionIndex, TrailerEntry};
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Which cross-reference structure a committed revision emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefFlavor {
    /// Classic `xref` table + `trailer` dictionary
    Table,

    /// `/Type /XRef` stream object
    Stream { filter: XrefStreamFilter },
}

/// Filter applied to an emitted xref stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefStreamFilter {
    /// Canonical choice, keeps the table readable in a hex editor
    AsciiHex,

    /// Used by `compress`, like every other stream it emits
    Flate,
}

/// Keys that only belong to one xref flavor and must not leak into the
/// other one's trailer.
const STREAM_ONLY_KEYS: [&str; 6] = ["/Type", "/W", "/Index", "/Filter", "/DecodeParms", "/Length"];

/// Where one changed object landed, for xref emission.
#[derive(Debug, Clone, Copy)]
enum RowTarget {
    /// Free row; the offset column carries the next free object number
    Free { next_free: u32 },

    /// Written uncompressed at this absolute offset
    At { pos: u64 },

    /// Written into envelope `env` at ordinal `ord`
    In { env: u32, ord: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Row {
    num: u32,
    gen: u16,
    target: RowTarget,
}

/// Accumulates the children of one object-stream envelope.
#[derive(Default)]
struct EnvBuilder {
    pairs: Vec<(u32, usize)>,
    body: Vec<u8>,
}

impl EnvBuilder {
    fn push(&mut self, num: u32, serialized: &[u8]) -> u32 {
        let ord = self.pairs.len() as u32;
        self.pairs.push((num, self.body.len()));
        self.body.extend_from_slice(serialized);
        self.body.push(b'\n');
        ord
    }

    /// Prepends the `obj_num offset` header and encodes the content per
    /// the envelope's own `/Filter`.
    fn finalize(self, template: &StreamObject) -> PDFResult<StreamObject> {
        let mut itoa_buf = itoa::Buffer::new();
        let mut header = Vec::new();
        for (num, off) in &self.pairs {
            header.extend_from_slice(itoa_buf.format(*num).as_bytes());
            header.push(b' ');
            header.extend_from_slice(itoa_buf.format(*off).as_bytes());
            header.push(b' ');
        }
        header.push(b'\n');
        let mut entries = template.entries.clone();
        entries.insert("/Type".to_string(), PDFObject::Name("/ObjStm".into()));
        entries.insert("/N".to_string(), PDFObject::Integer(self.pairs.len() as i64));
        entries.insert("/First".to_string(), PDFObject::Integer(header.len() as i64));
        let mut content = header;
        content.extend_from_slice(&self.body);
        StreamObject::forge(entries, content)
    }
}

/// Builds the circular free chain over the deleted object numbers.
///
/// The head is object 0; each deleted entry points at the next deleted
/// number and the last one points back to 0.
fn free_chain(deleted: &[u32]) -> FxHashMap<u32, u32> {
    let mut next_free = FxHashMap::default();
    let mut from = 0u32;
    for &num in deleted {
        next_free.insert(from, num);
        from = num;
    }
    next_free.insert(from, 0);
    next_free
}

/// Splits sorted rows into contiguous-run subsections.
fn subsection_runs(rows: &[Row]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=rows.len() {
        let broken = i == rows.len() || rows[i].num != rows[i - 1].num + 1;
        if broken {
            runs.push((start, i));
            start = i;
        }
    }
    runs
}

/// Smallest byte width able to hold `value`.
fn byte_width(value: u64) -> usize {
    let mut width = 1;
    let mut v = value >> 8;
    while v > 0 {
        width += 1;
        v >>= 8;
    }
    width
}

fn big_endian(value: u64, width: usize) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    bytes[8 - width..].to_vec()
}

/// The materialized value of a staged object.
fn staged_object<'a>(
    cache: &'a [Option<Rc<PDFObject>>],
    num: u32,
) -> PDFResult<&'a PDFObject> {
    cache
        .get(num as usize)
        .and_then(|slot| slot.as_deref())
        .ok_or_else(|| PDFError::mutation(format!("object {} staged but not materialized", num)))
}

/// Serializes one incremental update: changed objects, deletions folded
/// into the free chain, and exactly one xref structure, ending with
/// `startxref` and `%%EOF`.
///
/// `start` is the absolute offset where this revision begins. Returns the
/// revision bytes and the updated index whose positions are absolute.
pub fn build_revision(
    changes: &[(u32, ChangeKind)],
    current: &RevisionIndex,
    cache: &[Option<Rc<PDFObject>>],
    start: u64,
    flavor: XrefFlavor,
) -> PDFResult<(Vec<u8>, RevisionIndex)> {
    let rev = current
        .trailer
        .first()
        .map(|t| t.doc_ver)
        .unwrap_or_default();
    let mut new_index = current.clone();
    let mut trailer_dict = match cache.first().and_then(|s| s.as_deref()) {
        Some(PDFObject::Dictionary(d)) => d.clone(),
        _ => return Err(PDFError::mutation("revision has no staged trailer")),
    };

    let deleted: Vec<u32> = changes
        .iter()
        .filter(|(_, kind)| *kind == ChangeKind::Delete)
        .map(|(num, _)| *num)
        .collect();
    let next_free = free_chain(&deleted);

    let mut out: Vec<u8> = b"\n".to_vec();
    let mut counter = start + 1;
    let mut rows: Vec<Row> = Vec::new();
    let mut envelopes: FxHashMap<u32, EnvBuilder> = FxHashMap::default();

    // Pass 1: embedded updates accumulate inside their envelopes
    for (num, kind) in changes {
        if *kind != ChangeKind::Upsert {
            continue;
        }
        let entry = current
            .get(*num)
            .ok_or_else(|| PDFError::mutation(format!("object {} not in index", num)))?
            .clone();
        if let EntryKind::StagedEmbedded { env_num } = entry.kind {
            let serialized = serialize(staged_object(cache, *num)?)?;
            let ord = envelopes.entry(env_num).or_default().push(*num, &serialized);
            rows.push(Row {
                num: *num,
                gen: entry.o_gen,
                target: RowTarget::In { env: env_num, ord },
            });
            new_index.entries[*num as usize] = Some(IndexEntry {
                kind: EntryKind::Embedded {
                    env_num,
                    o_pos: ord,
                },
                ..entry
            });
        }
    }

    // Pass 2: direct objects, ascending object number
    for (num, kind) in changes {
        if *kind != ChangeKind::Upsert {
            continue;
        }
        let entry = current
            .get(*num)
            .ok_or_else(|| PDFError::mutation(format!("object {} not in index", num)))?
            .clone();
        if !matches!(entry.kind, EntryKind::Staged) {
            continue;
        }
        let block = match envelopes.remove(num) {
            Some(builder) => {
                let template = staged_object(cache, *num)?.as_stream().ok_or_else(|| {
                    PDFError::mutation(format!("envelope {} is not a stream", num))
                })?;
                let finalized = builder.finalize(template)?;
                serialize_fragment(*num, entry.o_gen, &PDFObject::Stream(finalized))?
            }
            None => serialize_fragment(*num, entry.o_gen, staged_object(cache, *num)?)?,
        };
        rows.push(Row {
            num: *num,
            gen: entry.o_gen,
            target: RowTarget::At { pos: counter },
        });
        new_index.entries[*num as usize] = Some(IndexEntry {
            kind: EntryKind::InUse {
                abs_pos: counter,
                abs_next: counter + block.len() as u64,
            },
            ..entry
        });
        out.extend_from_slice(&block);
        counter += block.len() as u64;
    }
    if let Some(env) = envelopes.keys().next() {
        return Err(PDFError::mutation(format!(
            "envelope {} received objects but is not staged itself",
            env
        )));
    }

    // Deletions: the free-list head plus one free row per deleted object
    rows.push(Row {
        num: 0,
        gen: u16::MAX,
        target: RowTarget::Free {
            next_free: next_free[&0],
        },
    });
    for (num, kind) in changes {
        if *kind != ChangeKind::Delete {
            continue;
        }
        let gen = current.get(*num).map(|e| e.o_gen).unwrap_or(0);
        rows.push(Row {
            num: *num,
            gen: gen.saturating_add(1),
            target: RowTarget::Free {
                next_free: next_free[num],
            },
        });
    }
    rows.sort_by_key(|r| r.num);

    let xref_pos = counter;
    match flavor {
        XrefFlavor::Table => {
            if rows
                .iter()
                .any(|r| matches!(r.target, RowTarget::In { .. }))
            {
                return Err(PDFError::mutation(
                    "embedded objects require an xref stream revision",
                ));
            }
            let mut block: Vec<u8> = b"xref\n".to_vec();
            for (lo, hi) in subsection_runs(&rows) {
                block.extend_from_slice(
                    format!("{} {}\n", rows[lo].num, hi - lo).as_bytes(),
                );
                for row in &rows[lo..hi] {
                    match row.target {
                        RowTarget::At { pos } => block.extend_from_slice(
                            format!("{:010} {:05} n \n", pos, row.gen).as_bytes(),
                        ),
                        RowTarget::Free { next_free } => block.extend_from_slice(
                            format!("{:010} {:05} f \n", next_free, row.gen).as_bytes(),
                        ),
                        RowTarget::In { .. } => unreachable!(),
                    }
                }
            }
            for key in STREAM_ONLY_KEYS {
                trailer_dict.shift_remove(key);
            }
            trailer_dict.shift_remove("/XRefStm");
            trailer_dict.insert(
                "/Size".to_string(),
                PDFObject::Integer(new_index.entries.len() as i64),
            );
            let trailer_off = block.len();
            block.extend_from_slice(b"trailer\n");
            block.extend_from_slice(&serialize(&PDFObject::Dictionary(trailer_dict))?);
            block.push(b'\n');

            new_index.trailer = vec![TrailerEntry {
                abs_pos: xref_pos + trailer_off as u64,
                abs_next: xref_pos + block.len() as u64,
                startxref_pos: xref_pos + block.len() as u64,
                xref_table_pos: Some(xref_pos),
                xref_stream_pos: None,
                xref_stream_num: None,
                xref_stm: false,
                o_ver: rev,
                doc_ver: rev,
            }];
            out.extend_from_slice(&block);
        }
        XrefFlavor::Stream { filter } => {
            let xnum = new_index.entries.len() as u32;
            rows.push(Row {
                num: xnum,
                gen: 0,
                target: RowTarget::At { pos: xref_pos },
            });
            rows.sort_by_key(|r| r.num);

            let mut max_field = 0u64;
            for row in &rows {
                let (f2, f3) = match row.target {
                    RowTarget::Free { next_free } => (next_free as u64, row.gen as u64),
                    RowTarget::At { pos } => (pos, row.gen as u64),
                    RowTarget::In { env, ord } => (env as u64, ord as u64),
                };
                max_field = max_field.max(f2).max(f3);
            }
            let b = byte_width(max_field);

            let mut records = Vec::with_capacity(rows.len() * (1 + 2 * b));
            let mut index_array = Vec::new();
            for (lo, hi) in subsection_runs(&rows) {
                index_array.push(PDFObject::Integer(rows[lo].num as i64));
                index_array.push(PDFObject::Integer((hi - lo) as i64));
                for row in &rows[lo..hi] {
                    let (tag, f2, f3) = match row.target {
                        RowTarget::Free { next_free } => (0u8, next_free as u64, row.gen as u64),
                        RowTarget::At { pos } => (1, pos, row.gen as u64),
                        RowTarget::In { env, ord } => (2, env as u64, ord as u64),
                    };
                    records.push(tag);
                    records.extend_from_slice(&big_endian(f2, b));
                    records.extend_from_slice(&big_endian(f3, b));
                }
            }

            let mut entries = trailer_dict;
            for key in STREAM_ONLY_KEYS {
                entries.shift_remove(key);
            }
            entries.shift_remove("/XRefStm");
            entries.insert("/Type".to_string(), PDFObject::Name("/XRef".into()));
            entries.insert(
                "/Size".to_string(),
                PDFObject::Integer(xnum as i64 + 1),
            );
            entries.insert(
                "/W".to_string(),
                PDFObject::Array(vec![
                    PDFObject::Integer(1),
                    PDFObject::Integer(b as i64),
                    PDFObject::Integer(b as i64),
                ]),
            );
            entries.insert("/Index".to_string(), PDFObject::Array(index_array));
            entries.insert(
                "/Filter".to_string(),
                PDFObject::Name(
                    match filter {
                        XrefStreamFilter::AsciiHex => "/ASCIIHexDecode",
                        XrefStreamFilter::Flate => "/FlateDecode",
                    }
                    .to_string(),
                ),
            );
            let stream = StreamObject::forge(entries, records)?;
            let block = serialize_fragment(xnum, 0, &PDFObject::Stream(stream))?;

            new_index.entries.push(Some(IndexEntry {
                o_num: xnum,
                o_gen: 0,
                o_ver: 0,
                doc_ver: rev,
                kind: EntryKind::XrefStream {
                    abs_pos: xref_pos,
                    abs_next: xref_pos + block.len() as u64,
                },
            }));
            new_index.trailer = vec![TrailerEntry {
                abs_pos: xref_pos,
                abs_next: xref_pos + block.len() as u64,
                startxref_pos: xref_pos + block.len() as u64,
                xref_table_pos: None,
                xref_stream_pos: Some(xref_pos),
                xref_stream_num: Some(xnum),
                xref_stm: false,
                o_ver: rev,
                doc_ver: rev,
            }];
            out.extend_from_slice(&block);
        }
    }

    let eof_rel = out.len() + format!("startxref\n{}\n", xref_pos).len();
    out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_pos).as_bytes());
    new_index.eof_pos = Some(start + eof_rel as u64);
    Ok((out, new_index))
}
