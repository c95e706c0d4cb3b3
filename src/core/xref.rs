use super::bdata::SharedProvider;
use super::error::{PDFError, PDFResult};
use super::lexer::{expect_token, TokenKind};
use super::object::{Dict, PDFObject};
use super::parser::parse_indirect_object;
use super::regions::parse_xref_table_at;
use log::warn;
use smallvec::SmallVec;
use std::collections::HashSet;

/// Location kinds an object number can have within one revision.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    /// Stored uncompressed at an absolute byte range
    InUse { abs_pos: u64, abs_next: u64 },

    /// Embedded in an object stream, at ordinal `o_pos`
    Embedded { env_num: u32, o_pos: u32 },

    /// On the free list
    Free { next_free: u32 },

    /// Deleted in this revision, not yet written to the free chain
    Deleted,

    /// The object hosting an xref stream (pseudo-object, skipped by squash)
    XrefStream { abs_pos: u64, abs_next: u64 },

    /// Updated or added in the open revision; bytes not yet written
    Staged,

    /// Staged and routed into an object-stream envelope at write time
    StagedEmbedded { env_num: u32 },
}

/// Index record for one object number in one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub o_num: u32,
    pub o_gen: u16,

    /// Version of this object number, monotonic across revisions
    pub o_ver: u32,

    /// Revision this record belongs to
    pub doc_ver: u32,

    pub kind: EntryKind,
}

/// Trailer record occupying the object-number-0 slot of a revision.
///
/// A linearized file carries two of these in its first revision (the main
/// trailer and the first-page trailer); every other revision carries one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrailerEntry {
    /// Byte range of the trailer dictionary (classic) or xref stream object
    pub abs_pos: u64,
    pub abs_next: u64,

    /// Position of the `startxref` keyword of this revision
    pub startxref_pos: u64,

    /// Position of the classic `xref` table, if any
    pub xref_table_pos: Option<u64>,

    /// Position of the xref stream object, if any
    pub xref_stream_pos: Option<u64>,

    /// Object number hosting the xref stream, if any
    pub xref_stream_num: Option<u32>,

    /// True when a classic table carried an /XRefStm companion (hybrid)
    pub xref_stm: bool,

    pub o_ver: u32,
    pub doc_ver: u32,
}

/// Per-revision object index: the trailer slot plus one slot per object
/// number (slot 0 is never used for a regular object).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevisionIndex {
    pub trailer: Vec<TrailerEntry>,
    pub entries: Vec<Option<IndexEntry>>,

    /// Position of this revision's `%%EOF` (None for unwritten revisions)
    pub eof_pos: Option<u64>,
}

impl RevisionIndex {
    /// Returns the entry for an object number, if present.
    pub fn get(&self, num: u32) -> Option<&IndexEntry> {
        self.entries.get(num as usize)?.as_ref()
    }

    /// Highest object number representable in this revision.
    pub fn max_object_num(&self) -> u32 {
        (self.entries.len().saturating_sub(1)) as u32
    }

    /// Object numbers that resolve to content in this revision.
    pub fn in_use_numbers(&self) -> Vec<u32> {
        let mut nums = Vec::new();
        for (num, slot) in self.entries.iter().enumerate().skip(1) {
            if let Some(entry) = slot {
                match entry.kind {
                    EntryKind::InUse { .. }
                    | EntryKind::Embedded { .. }
                    | EntryKind::Staged
                    | EntryKind::StagedEmbedded { .. } => nums.push(num as u32),
                    EntryKind::Free { .. }
                    | EntryKind::Deleted
                    | EntryKind::XrefStream { .. } => {}
                }
            }
        }
        nums
    }
}

/// Location described by one raw xref record, before revision assembly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum XrefRecordKind {
    InUse { offset: u64 },
    Embedded { env: u32, pos: u32 },
    Free { next_free: u32 },
}

/// A raw record read from one xref structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrefRecord {
    pub num: u32,
    pub gen: u16,
    pub kind: XrefRecordKind,
}

/// One xref structure (classic table, xref stream, or a fused hybrid
/// pair), in file-tail-first discovery order.
#[derive(Debug)]
pub struct XrefSection {
    entries: Vec<XrefRecord>,
    pub trailer_dict: Dict,

    /// Start of the xref structure itself
    pub xref_pos: u64,

    /// Position of the trailer dictionary (classic) or stream object
    pub trailer_pos: u64,

    pub table_pos: Option<u64>,
    pub stream_pos: Option<u64>,
    pub stream_num: Option<u32>,
    pub xref_stm: bool,

    pub startxref_pos: u64,
    pub eof_pos: u64,
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .rposition(|w| w == needle)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn dict_int(dict: &Dict, key: &str) -> Option<i64> {
    dict.get(key).and_then(|o| o.as_int())
}

/// Reads a big-endian integer of `width` bytes.
fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Decodes every record of a `/Type /XRef` stream object.
///
/// Record layout comes from `/W [w1 w2 w3]` (big-endian fields); covered
/// object numbers come from `/Index [first count …]`, defaulting to
/// `[0 /Size]`. Types: 0 free, 1 in-use, 2 embedded.
pub fn xref_stream_records(stream: &super::object::StreamObject) -> PDFResult<Vec<XrefRecord>> {
    let content = stream
        .decoded
        .data()
        .ok_or_else(|| PDFError::xref(0, "xref stream content failed to decode"))?;

    let widths: SmallVec<[usize; 3]> = match stream.entries.get("/W") {
        Some(PDFObject::Array(items)) if items.len() == 3 => items
            .iter()
            .map(|o| o.as_int().unwrap_or(-1) as usize)
            .collect(),
        _ => return Err(PDFError::xref(0, "xref stream /W must be 3 numbers")),
    };
    let (w1, w2, w3) = (widths[0], widths[1], widths[2]);
    let record_len = w1 + w2 + w3;
    if record_len == 0 || record_len > 32 {
        return Err(PDFError::xref(0, "bad xref stream /W widths"));
    }

    let index: Vec<(u32, usize)> = match stream.entries.get("/Index") {
        Some(PDFObject::Array(items)) => {
            if items.len() % 2 != 0 {
                return Err(PDFError::xref(0, "odd /Index array"));
            }
            items
                .chunks(2)
                .map(|pair| {
                    Ok((
                        pair[0]
                            .as_int()
                            .ok_or_else(|| PDFError::xref(0, "bad /Index entry"))?
                            as u32,
                        pair[1]
                            .as_int()
                            .ok_or_else(|| PDFError::xref(0, "bad /Index entry"))?
                            as usize,
                    ))
                })
                .collect::<PDFResult<_>>()?
        }
        _ => {
            let size = dict_int(&stream.entries, "/Size")
                .ok_or_else(|| PDFError::xref(0, "xref stream missing /Size"))?;
            vec![(0, size as usize)]
        }
    };

    let mut records = Vec::new();
    let mut pos = 0usize;
    for (first, count) in index {
        for j in 0..count {
            if pos + record_len > content.len() {
                return Err(PDFError::xref(0, "xref stream data truncated"));
            }
            let entry_type = if w1 > 0 {
                read_be(&content[pos..pos + w1])
            } else {
                1 // type defaults to in-use when w1 == 0
            };
            let field2 = read_be(&content[pos + w1..pos + w1 + w2]);
            let field3 = read_be(&content[pos + w1 + w2..pos + record_len]);
            pos += record_len;

            let obj_num = first + j as u32;
            let kind = match entry_type {
                0 => XrefRecordKind::Free {
                    next_free: field2 as u32,
                },
                1 => XrefRecordKind::InUse { offset: field2 },
                2 => XrefRecordKind::Embedded {
                    env: field2 as u32,
                    pos: field3 as u32,
                },
                other => {
                    return Err(PDFError::xref(
                        0,
                        format!("invalid xref entry type {} for object {}", other, obj_num),
                    ))
                }
            };
            let gen = match kind {
                XrefRecordKind::Embedded { .. } => 0,
                _ => field3.min(u16::MAX as u64) as u16,
            };
            records.push(XrefRecord {
                num: obj_num,
                gen,
                kind,
            });
        }
    }
    Ok(records)
}

/// Parses an indirect xref stream object at the start of `data`,
/// returning its records (minus the trailer slot), its dictionary and
/// its object number.
fn parse_xref_stream_section(
    data: &[u8],
    xref_pos: usize,
) -> PDFResult<(Vec<XrefRecord>, Dict, u32)> {
    let (num, _gen, object, _end) = parse_indirect_object(data, 0)
        .map_err(|e| PDFError::xref(xref_pos, format!("bad xref stream object: {}", e)))?;
    let stream = object
        .as_stream()
        .ok_or_else(|| PDFError::xref(xref_pos, "expected xref stream object"))?;
    match stream.entries.get("/Type").and_then(|o| o.as_name()) {
        Some("/XRef") => {}
        other => {
            return Err(PDFError::xref(
                xref_pos,
                format!("expected /Type /XRef, got {:?}", other),
            ))
        }
    }
    let records = xref_stream_records(stream)
        .map_err(|e| match e {
            PDFError::Xref { reason, .. } => PDFError::xref(xref_pos, reason),
            other => other,
        })?
        .into_iter()
        .filter(|r| r.num != 0) // slot 0 belongs to the trailer
        .collect();
    Ok((records, stream.entries.clone(), num))
}

/// Converts a classic table's subsections into raw records.
fn classic_entries(subsections: &[super::regions::XrefSubsection]) -> Vec<XrefRecord> {
    let mut entries = Vec::new();
    for sub in subsections {
        for (i, row) in sub.rows.iter().enumerate() {
            let num = sub.first + i as u32;
            if num == 0 {
                continue; // free-list head; slot 0 belongs to the trailer
            }
            let kind = if row.in_use {
                XrefRecordKind::InUse { offset: row.offset }
            } else {
                XrefRecordKind::Free {
                    next_free: row.offset as u32,
                }
            };
            entries.push(XrefRecord {
                num,
                gen: row.gen.min(u16::MAX as u32) as u16,
                kind,
            });
        }
    }
    entries
}

/// Merges hybrid companion entries into the classic entries.
///
/// When both structures list the same object at the same offset the
/// entries fuse; when they disagree the classic table wins.
fn merge_hybrid(classic: &mut Vec<XrefRecord>, companion: Vec<XrefRecord>) {
    for entry in companion {
        match classic.iter().find(|e| e.num == entry.num) {
            None => classic.push(entry),
            Some(existing) if *existing == entry => {}
            Some(existing) => {
                warn!(
                    "hybrid xref disagreement for object {}: table {:?} vs stream {:?}, keeping table",
                    entry.num, existing.kind, entry.kind
                );
            }
        }
    }
}

/// Walks the file tail backward through `startxref`, `/Prev` and
/// `/XRefStm` to collect every xref section, newest first.
pub fn build_xref_sequence(provider: &SharedProvider) -> PDFResult<Vec<XrefSection>> {
    let mut p = provider.borrow_mut();
    let size = p.len()?;
    let tail = p.tail(2048)?;
    let tail_origin = (size as usize).saturating_sub(tail.len());

    rfind(&tail, b"%%EOF")
        .ok_or_else(|| PDFError::parse(size as usize, "no %%EOF marker found"))?;
    let sx_rel = rfind(&tail, b"startxref")
        .ok_or_else(|| PDFError::parse(size as usize, "no startxref found"))?;
    let sx_token = expect_token(&tail, sx_rel + 9)?;
    if sx_token.kind != TokenKind::Integer {
        return Err(PDFError::parse(
            tail_origin + sx_token.start,
            "expected startxref offset",
        ));
    }
    let first_xref_pos: u64 = std::str::from_utf8(&tail[sx_token.start..sx_token.end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            PDFError::parse(tail_origin + sx_token.start, "malformed startxref offset")
        })?;

    let mut sections: Vec<XrefSection> = Vec::new();
    let mut visited: HashSet<u64> = HashSet::new();
    let mut next_pos = Some(first_xref_pos);

    while let Some(xref_pos) = next_pos.take() {
        if xref_pos >= size {
            return Err(PDFError::xref(
                xref_pos as usize,
                "xref position past end of file",
            ));
        }
        if !visited.insert(xref_pos) {
            return Err(PDFError::xref(xref_pos as usize, "circular xref chain"));
        }
        let seg = p.read(xref_pos as i64, -1)?;
        let startxref_pos = xref_pos
            + find(&seg, b"startxref")
                .ok_or_else(|| PDFError::xref(xref_pos as usize, "no startxref after xref"))?
                as u64;
        let eof_pos = xref_pos
            + find(&seg, b"%%EOF")
                .ok_or_else(|| PDFError::xref(xref_pos as usize, "no %%EOF after xref"))?
                as u64;

        let section = if seg.starts_with(b"xref") {
            let (subsections, trailer_dict, trailer_rel, _end) =
                parse_xref_table_at(&seg, 0)
                    .map_err(|e| PDFError::xref(xref_pos as usize, format!("{}", e)))?;
            let mut entries = classic_entries(&subsections);
            let mut xref_stm = false;
            if let Some(stm_pos) = dict_int(&trailer_dict, "/XRefStm") {
                // Hybrid: the companion stream merges into this revision
                let aux = p.read(stm_pos, -1)?;
                let (aux_entries, _aux_dict, _aux_num) =
                    parse_xref_stream_section(&aux, stm_pos as usize)?;
                merge_hybrid(&mut entries, aux_entries);
                xref_stm = true;
            }
            XrefSection {
                entries,
                trailer_dict,
                xref_pos,
                trailer_pos: xref_pos + trailer_rel as u64,
                table_pos: Some(xref_pos),
                stream_pos: None,
                stream_num: None,
                xref_stm,
                startxref_pos,
                eof_pos,
            }
        } else {
            let (entries, trailer_dict, stream_num) =
                parse_xref_stream_section(&seg, xref_pos as usize)?;
            XrefSection {
                entries,
                trailer_dict,
                xref_pos,
                trailer_pos: xref_pos,
                table_pos: None,
                stream_pos: Some(xref_pos),
                stream_num: Some(stream_num),
                xref_stm: false,
                startxref_pos,
                eof_pos,
            }
        };

        if let Some(prev) = dict_int(&section.trailer_dict, "/Prev") {
            next_pos = Some(prev as u64);
        }
        sections.push(section);
    }
    Ok(sections)
}

/// Assembles per-revision indexes from the section chronology.
///
/// Sections are processed oldest first; within each later section the
/// newest record wins and `o_ver` increments. A section whose trailer
/// position precedes the previous one merges into the current revision as
/// a split trailer (linearized layout).
pub fn build_index(sections: &[XrefSection], file_size: u64) -> PDFResult<Vec<RevisionIndex>> {
    // Successor map over every known absolute position, %%EOF included
    let mut positions: Vec<u64> = Vec::new();
    for section in sections {
        positions.push(section.trailer_pos);
        positions.push(section.eof_pos);
        for entry in &section.entries {
            if let XrefRecordKind::InUse { offset } = entry.kind {
                positions.push(offset);
            }
        }
    }
    positions.push(file_size);
    positions.sort_unstable();
    positions.dedup();
    // binary_search's Err(i) is the insertion point, whose element is
    // already greater than pos
    let successor = |pos: u64| -> u64 {
        match positions.binary_search(&pos) {
            Ok(i) => positions.get(i + 1).copied().unwrap_or(file_size),
            Err(i) => positions.get(i).copied().unwrap_or(file_size),
        }
    };

    let mut revisions: Vec<RevisionIndex> = Vec::new();
    let mut prev_trailer_pos: u64 = 0;

    for section in sections.iter().rev() {
        let new_revision = revisions.is_empty() || section.trailer_pos > prev_trailer_pos;
        if new_revision {
            let entries = revisions
                .last()
                .map(|r| r.entries.clone())
                .unwrap_or_else(|| vec![None]);
            revisions.push(RevisionIndex {
                trailer: Vec::new(),
                entries,
                eof_pos: Some(section.eof_pos),
            });
            prev_trailer_pos = section.trailer_pos;
        } else if let Some(last) = revisions.last_mut() {
            // Linearized pair: fold into the current revision
            last.eof_pos = Some(last.eof_pos.unwrap_or(0).max(section.eof_pos));
        }
        let doc_ver = (revisions.len() - 1) as u32;
        let revision = revisions.last_mut().expect("at least one revision");

        revision.trailer.push(TrailerEntry {
            abs_pos: section.trailer_pos,
            abs_next: successor(section.trailer_pos),
            startxref_pos: section.startxref_pos,
            xref_table_pos: section.table_pos,
            xref_stream_pos: section.stream_pos,
            xref_stream_num: section.stream_num,
            xref_stm: section.xref_stm,
            o_ver: doc_ver,
            doc_ver,
        });

        for raw in &section.entries {
            let num = raw.num as usize;
            if revision.entries.len() <= num {
                revision.entries.resize(num + 1, None);
            }
            let kind = match raw.kind {
                XrefRecordKind::InUse { offset } => {
                    if section.stream_num == Some(raw.num) {
                        EntryKind::XrefStream {
                            abs_pos: offset,
                            abs_next: successor(offset),
                        }
                    } else {
                        EntryKind::InUse {
                            abs_pos: offset,
                            abs_next: successor(offset),
                        }
                    }
                }
                XrefRecordKind::Embedded { env, pos } => EntryKind::Embedded {
                    env_num: env,
                    o_pos: pos,
                },
                XrefRecordKind::Free { next_free } => EntryKind::Free { next_free },
            };
            let o_ver = match &revision.entries[num] {
                None => 0,
                Some(old) if old.kind == kind && old.o_gen == raw.gen => {
                    // Same location listed twice (hybrid or linearized
                    // overlap): keep the existing record untouched
                    continue;
                }
                Some(old) => old.o_ver + 1,
            };
            revision.entries[num] = Some(IndexEntry {
                o_num: raw.num,
                o_gen: raw.gen,
                o_ver,
                doc_ver,
                kind,
            });
        }
    }

    // Sanity: every embedded entry must point at an existing slot
    if let Some(last) = revisions.last() {
        for slot in last.entries.iter().flatten() {
            if let EntryKind::Embedded { env_num, .. } = slot.kind {
                if last.get(env_num).is_none() {
                    return Err(PDFError::xref(
                        0,
                        format!(
                            "object {} embedded in missing container {}",
                            slot.o_num, env_num
                        ),
                    ));
                }
            }
        }
    }
    Ok(revisions)
}

/// Lists entries of a revision that do not lead to a matching object
/// definition in the sequential file map.
///
/// Returns `(object number, recorded position)` pairs. An in-use entry
/// dangles when no `N G obj` definition starts at its offset; an embedded
/// entry dangles when its container slot is missing.
pub fn check_dangling_entries(
    regions: &[super::regions::Region],
    revision: &RevisionIndex,
) -> Vec<(u32, u64)> {
    use super::regions::Region;
    let mut defined: rustc_hash::FxHashMap<u64, (u32, u16)> = rustc_hash::FxHashMap::default();
    for region in regions {
        if let Region::IndirectObject { start, num, gen, .. } = region {
            defined.insert(*start as u64, (*num, *gen));
        }
    }
    let mut dangling = Vec::new();
    for entry in revision.entries.iter().flatten() {
        match entry.kind {
            EntryKind::InUse { abs_pos, .. } | EntryKind::XrefStream { abs_pos, .. } => {
                match defined.get(&abs_pos) {
                    Some(&(num, gen)) if num == entry.o_num && gen == entry.o_gen => {}
                    _ => dangling.push((entry.o_num, abs_pos)),
                }
            }
            EntryKind::Embedded { env_num, .. } => {
                if revision.get(env_num).is_none() {
                    dangling.push((entry.o_num, env_num as u64));
                }
            }
            _ => {}
        }
    }
    dangling
}

/// Lists object definitions that no revision's xref structure indexes.
///
/// Returns `(object number, position)` pairs, sorted by position. These
/// are reachable only by a sequential scan, which usually means a broken
/// or hand-edited file.
pub fn check_unindexed_objects(
    regions: &[super::regions::Region],
    revisions: &[RevisionIndex],
) -> Vec<(u32, u64)> {
    use super::regions::Region;
    let mut indexed: rustc_hash::FxHashSet<u64> = rustc_hash::FxHashSet::default();
    for revision in revisions {
        for entry in revision.entries.iter().flatten() {
            if let EntryKind::InUse { abs_pos, .. } | EntryKind::XrefStream { abs_pos, .. } =
                entry.kind
            {
                indexed.insert(abs_pos);
            }
        }
    }
    let mut unindexed = Vec::new();
    for region in regions {
        if let Region::IndirectObject { start, num, .. } = region {
            if !indexed.contains(&(*start as u64)) {
                unindexed.push((*num, *start as u64));
            }
        }
    }
    unindexed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bdata::{share, MemoryProvider};
    use crate::core::filters;
    use crate::core::object::{serialize_fragment, Decoded, StreamObject};

    fn provider_of(bytes: Vec<u8>) -> SharedProvider {
        share(MemoryProvider::new(bytes))
    }

    /// Builds a tiny classic-xref file with two objects.
    fn classic_file() -> (Vec<u8>, u64, u64) {
        let mut data = Vec::new();
        data.extend_from_slice(b"%PDF-1.4\n");
        let o1 = data.len() as u64;
        data.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let o2 = data.len() as u64;
        data.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
        let xref = data.len();
        data.extend_from_slice(b"xref\n0 3\n");
        data.extend_from_slice(b"0000000000 65535 f \n");
        data.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
        data.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
        data.extend_from_slice(b"trailer\n<< /Size 3 /Root 1 0 R >>\n");
        data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());
        (data, o1, o2)
    }

    #[test]
    fn test_classic_sequence() {
        let (data, _, _) = classic_file();
        let provider = provider_of(data);
        let sections = build_xref_sequence(&provider).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].entries.len(), 2);
        assert_eq!(
            sections[0].trailer_dict.get("/Size"),
            Some(&PDFObject::Integer(3))
        );
        assert!(sections[0].table_pos.is_some());
        assert!(!sections[0].xref_stm);
    }

    #[test]
    fn test_classic_index() {
        let (data, o1, o2) = classic_file();
        let size = data.len() as u64;
        let provider = provider_of(data);
        let sections = build_xref_sequence(&provider).unwrap();
        let revisions = build_index(&sections, size).unwrap();
        assert_eq!(revisions.len(), 1);
        let rev = &revisions[0];
        assert_eq!(rev.trailer.len(), 1);
        let e1 = rev.get(1).unwrap();
        let e2 = rev.get(2).unwrap();
        match e1.kind {
            EntryKind::InUse { abs_pos, abs_next } => {
                assert_eq!(abs_pos, o1);
                assert_eq!(abs_next, o2);
            }
            ref other => panic!("expected InUse, got {:?}", other),
        }
        match e2.kind {
            EntryKind::InUse { abs_pos, abs_next } => {
                assert_eq!(abs_pos, o2);
                // Next known position is the trailer
                assert_eq!(abs_next, rev.trailer[0].abs_pos);
            }
            ref other => panic!("expected InUse, got {:?}", other),
        }
        assert_eq!(e1.o_ver, 0);
        assert_eq!(e1.doc_ver, 0);
    }

    /// Builds a file whose single revision uses an xref stream.
    fn stream_file() -> (Vec<u8>, u64) {
        let mut data = Vec::new();
        data.extend_from_slice(b"%PDF-1.5\n");
        let o1 = data.len() as u64;
        data.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let o2 = data.len() as u64;
        data.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
        let xref_at = data.len() as u64;
        // W = [1 2 1]: records for objects 0..=3
        let mut records = Vec::new();
        records.extend_from_slice(&[0, 0, 0, 255]); // 0: free head
        records.push(1);
        records.extend_from_slice(&(o1 as u16).to_be_bytes());
        records.push(0);
        records.push(1);
        records.extend_from_slice(&(o2 as u16).to_be_bytes());
        records.push(0);
        records.push(1);
        records.extend_from_slice(&(xref_at as u16).to_be_bytes());
        records.push(0);
        let mut entries = Dict::new();
        entries.insert("/Type".into(), PDFObject::Name("/XRef".into()));
        entries.insert("/Size".into(), PDFObject::Integer(4));
        entries.insert(
            "/W".into(),
            PDFObject::Array(vec![
                PDFObject::Integer(1),
                PDFObject::Integer(2),
                PDFObject::Integer(1),
            ]),
        );
        entries.insert("/Root".into(), PDFObject::reference(1));
        entries.insert("/Filter".into(), PDFObject::Name("/ASCIIHexDecode".into()));
        let encoded = filters::asciihex_encode(&records);
        let stream = StreamObject {
            entries,
            encoded,
            decoded: Decoded::Data(records),
        };
        let block = serialize_fragment(3, 0, &PDFObject::Stream(stream)).unwrap();
        data.extend_from_slice(&block);
        data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_at).as_bytes());
        (data, xref_at)
    }

    #[test]
    fn test_xref_stream_sequence_and_index() {
        let (data, xref_at) = stream_file();
        let size = data.len() as u64;
        let provider = provider_of(data);
        let sections = build_xref_sequence(&provider).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].stream_num, Some(3));

        let revisions = build_index(&sections, size).unwrap();
        assert_eq!(revisions.len(), 1);
        let rev = &revisions[0];
        assert!(matches!(rev.get(1).unwrap().kind, EntryKind::InUse { .. }));
        match rev.get(3).unwrap().kind {
            EntryKind::XrefStream { abs_pos, .. } => assert_eq!(abs_pos, xref_at),
            ref other => panic!("expected XrefStream, got {:?}", other),
        }
        assert_eq!(rev.trailer[0].xref_stream_num, Some(3));
    }

    #[test]
    fn test_incremental_update_versions() {
        // Base file plus one update that replaces object 2
        let (mut data, _, _) = classic_file();
        let first_xref_pos = {
            // recover the xref position from the startxref line
            let text = String::from_utf8_lossy(&data);
            let at = text.rfind("startxref").unwrap();
            text[at + 10..].split_whitespace().next().unwrap().parse::<u64>().unwrap()
        };
        data.extend_from_slice(b"\n");
        let o2v2 = data.len() as u64;
        data.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 1 >>\nendobj\n");
        let xref2 = data.len();
        data.extend_from_slice(b"xref\n2 1\n");
        data.extend_from_slice(format!("{:010} 00000 n \n", o2v2).as_bytes());
        data.extend_from_slice(
            format!(
                "trailer\n<< /Size 3 /Root 1 0 R /Prev {} >>\n",
                first_xref_pos
            )
            .as_bytes(),
        );
        data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref2).as_bytes());

        let size = data.len() as u64;
        let provider = provider_of(data);
        let sections = build_xref_sequence(&provider).unwrap();
        assert_eq!(sections.len(), 2);
        let revisions = build_index(&sections, size).unwrap();
        assert_eq!(revisions.len(), 2);

        // Object 2 got a new version in revision 1; object 1 kept version 0
        let rev1 = &revisions[1];
        assert_eq!(rev1.get(2).unwrap().o_ver, 1);
        assert_eq!(rev1.get(2).unwrap().doc_ver, 1);
        assert_eq!(rev1.get(1).unwrap().o_ver, 0);
        assert_eq!(rev1.get(1).unwrap().doc_ver, 0);
        match rev1.get(2).unwrap().kind {
            EntryKind::InUse { abs_pos, .. } => assert_eq!(abs_pos, o2v2),
            ref other => panic!("expected InUse, got {:?}", other),
        }
        // Revision 0 still sees the original object 2
        assert_eq!(revisions[0].get(2).unwrap().o_ver, 0);
    }

    #[test]
    fn test_broken_chain_errors() {
        let data = b"%PDF-1.4\nno xref here\nstartxref\n2\n%%EOF\n".to_vec();
        let provider = provider_of(data);
        assert!(build_xref_sequence(&provider).is_err());
    }

    #[test]
    fn test_circular_prev_errors() {
        let mut data = Vec::new();
        data.extend_from_slice(b"%PDF-1.4\n");
        let xref = data.len();
        data.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n");
        data.extend_from_slice(format!("trailer\n<< /Size 1 /Prev {} >>\n", xref).as_bytes());
        data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());
        let provider = provider_of(data);
        assert!(build_xref_sequence(&provider).is_err());
    }

    #[test]
    fn test_xref_stream_records_with_index_gaps() {
        let records = vec![
            1u8, 0, 50, 0, // object 2: in use at 50
            2, 0, 9, 3, // object 7: embedded in 9, ordinal 3
        ];
        let mut entries = Dict::new();
        entries.insert("/Type".into(), PDFObject::Name("/XRef".into()));
        entries.insert(
            "/W".into(),
            PDFObject::Array(vec![
                PDFObject::Integer(1),
                PDFObject::Integer(2),
                PDFObject::Integer(1),
            ]),
        );
        entries.insert(
            "/Index".into(),
            PDFObject::Array(vec![
                PDFObject::Integer(2),
                PDFObject::Integer(1),
                PDFObject::Integer(7),
                PDFObject::Integer(1),
            ]),
        );
        let stream = StreamObject {
            entries,
            encoded: records.clone(),
            decoded: Decoded::Data(records),
        };
        let rows = xref_stream_records(&stream).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].num, 2);
        assert_eq!(rows[0].kind, XrefRecordKind::InUse { offset: 50 });
        assert_eq!(rows[1].num, 7);
        assert_eq!(rows[1].kind, XrefRecordKind::Embedded { env: 9, pos: 3 });
    }

    #[test]
    fn test_check_functions_on_consistent_file() {
        let (data, _, _) = classic_file();
        let size = data.len() as u64;
        let regions = crate::core::regions::scan_regions(&data).unwrap();
        let provider = provider_of(data);
        let sections = build_xref_sequence(&provider).unwrap();
        let revisions = build_index(&sections, size).unwrap();
        assert!(check_dangling_entries(&regions, revisions.last().unwrap()).is_empty());
        assert!(check_unindexed_objects(&regions, &revisions).is_empty());
    }

    #[test]
    fn test_check_functions_flag_inconsistencies() {
        // Corrupt the xref so object 1's offset points into object 2,
        // and append an object no table mentions
        let (mut data, o1, o2) = classic_file();
        let needle = format!("{:010} 00000 n \n", o1);
        let wrong = format!("{:010} 00000 n \n", o2 + 1);
        let at = String::from_utf8_lossy(&data).find(&needle).unwrap();
        data[at..at + 20].copy_from_slice(wrong.as_bytes());

        let regions = crate::core::regions::scan_regions(&data).unwrap();
        let size = data.len() as u64;
        let provider = provider_of(data);
        let sections = build_xref_sequence(&provider).unwrap();
        let revisions = build_index(&sections, size).unwrap();

        let dangling = check_dangling_entries(&regions, revisions.last().unwrap());
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].0, 1);

        // Object 1's real definition is now unindexed
        let unindexed = check_unindexed_objects(&regions, &revisions);
        assert_eq!(unindexed.len(), 1);
        assert_eq!(unindexed[0], (1, o1));
    }
}
