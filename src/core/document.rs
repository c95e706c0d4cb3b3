use super::bdata::{share, FileProvider, MemoryProvider, SharedProvider};
use super::error::{PDFError, PDFResult};
use super::lexer::{expect_token, TokenKind};
use super::object::{Dict, PDFObject};
use super::parser::{parse_dict, parse_indirect_object, parse_objstm};
use super::regions::linearized_dict;
use super::strings::text_string;
use super::xref::{build_index, build_xref_sequence, EntryKind, IndexEntry, RevisionIndex, TrailerEntry};
use indexmap::IndexMap;
use log::warn;
use std::rc::Rc;

/// Info-dictionary keys surfaced by `metadata`.
const METADATA_ATTRS: [&str; 6] = [
    "/Title",
    "/Author",
    "/Subject",
    "/Keywords",
    "/Creator",
    "/Producer",
];

/// Byte storage of one revision.
#[derive(Clone)]
pub struct RevisionData {
    /// Provider over the file bytes up to and including this revision
    pub provider: SharedProvider,

    /// Absolute offset where this revision's own bytes begin
    pub start: u64,

    /// Absolute end of the revision (just past `%%EOF` and its EOL run);
    /// None while the revision is still open for editing
    pub eof_cut: Option<u64>,

    /// The serialized fragment, for revisions committed in memory
    pub bytes: Option<Rc<Vec<u8>>>,
}

/// What happened to an object number in the open revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Added or updated; its value sits in the cache
    Upsert,

    /// Deleted; joins the free chain at commit
    Delete,
}

/// A PDF document: revision-aware object index, decoded-object cache and
/// per-revision byte storage.
///
/// Values are functional at the document grain: every mutation returns a
/// new `PDFDocument` sharing immutable prior revisions. The cache memoizes
/// parsed objects for the newest revision; a slot fills at most once per
/// document value.
#[derive(Clone)]
pub struct PDFDocument {
    pub(crate) index: Vec<Rc<RevisionIndex>>,
    pub(crate) cache: Vec<Option<Rc<PDFObject>>>,
    pub(crate) data: Vec<RevisionData>,
}

impl std::fmt::Debug for PDFDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.cache.iter().filter(|c| c.is_some()).count();
        write!(
            f,
            "<PDFDocument with {} revision(s), {} staged change(s), {}/{} objects cached>",
            self.index.len(),
            self.changes().len(),
            cached,
            self.cache.len()
        )
    }
}

/// Locates the end of a revision: just past `%%EOF` plus any EOL bytes.
fn eof_cut_at(provider: &SharedProvider, eof_pos: u64) -> PDFResult<u64> {
    let window = provider.borrow_mut().read(eof_pos as i64, 16)?;
    let mut i = 5.min(window.len());
    while i < window.len() && (window[i] == b'\n' || window[i] == b'\r') {
        i += 1;
    }
    Ok(eof_pos + i as u64)
}

/// Reads and unions the trailer dictionaries of a revision.
///
/// A linearized revision has two trailers; later ones override earlier
/// keys. Classic trailers are the dictionary after the `trailer` keyword;
/// xref-stream trailers are the stream object's own dictionary.
pub(crate) fn read_trailer_union(
    provider: &SharedProvider,
    revision: &RevisionIndex,
) -> PDFResult<Dict> {
    let mut union = Dict::new();
    for entry in &revision.trailer {
        if entry.abs_next <= entry.abs_pos {
            continue; // unwritten trailer slot
        }
        let slice = provider
            .borrow_mut()
            .read(entry.abs_pos as i64, (entry.abs_next - entry.abs_pos) as i64)?;
        let dict = if entry.xref_stream_pos.is_some() {
            let (_, _, obj, _) = parse_indirect_object(&slice, 0)?;
            match obj {
                PDFObject::Stream(s) => s.entries,
                PDFObject::Dictionary(d) => d,
                _ => {
                    return Err(PDFError::xref(
                        entry.abs_pos as usize,
                        "xref stream slot holds no dictionary",
                    ))
                }
            }
        } else {
            let kw = expect_token(&slice, 0)?;
            if &slice[kw.start..kw.end] != b"trailer" {
                return Err(PDFError::xref(
                    entry.abs_pos as usize,
                    "expected 'trailer' keyword",
                ));
            }
            let dict_token = expect_token(&slice, kw.end)?;
            if dict_token.kind != TokenKind::Dict {
                return Err(PDFError::xref(
                    entry.abs_pos as usize,
                    "expected trailer dictionary",
                ));
            }
            parse_dict(&slice, &dict_token)?
        };
        for (k, v) in dict {
            union.insert(k, v);
        }
    }
    Ok(union)
}

impl PDFDocument {
    /// Loads a document from fully loaded bytes.
    pub fn load(bytes: Vec<u8>) -> PDFResult<Self> {
        Self::from_provider(share(MemoryProvider::new(bytes)))
    }

    /// Loads a document from a file, reading on demand.
    pub fn load_file(path: &str) -> PDFResult<Self> {
        Self::from_provider(share(FileProvider::open(path)?))
    }

    /// Loads a document from an arbitrary byte provider.
    ///
    /// Reconstructs the xref sequence, builds the per-revision index and
    /// opens an implicit editing revision on top.
    pub fn from_provider(provider: SharedProvider) -> PDFResult<Self> {
        let sections = build_xref_sequence(&provider)?;
        let size = provider.borrow_mut().len()?;
        let revisions = build_index(&sections, size)?;

        let mut data = Vec::with_capacity(revisions.len());
        let mut prev_cut = 0u64;
        for revision in &revisions {
            let eof_pos = revision.eof_pos.ok_or_else(|| {
                PDFError::xref(0, "loaded revision without %%EOF position")
            })?;
            let cut = eof_cut_at(&provider, eof_pos)?;
            data.push(RevisionData {
                provider: provider.clone(),
                start: prev_cut,
                eof_cut: Some(cut),
                bytes: None,
            });
            prev_cut = cut;
        }

        let cache_len = revisions.last().map(|r| r.entries.len()).unwrap_or(1);
        let doc = PDFDocument {
            index: revisions.into_iter().map(Rc::new).collect(),
            cache: vec![None; cache_len],
            data,
        };
        doc.open_revision()
    }

    /// The newest revision's index.
    pub(crate) fn current_index(&self) -> &RevisionIndex {
        self.index.last().expect("document has at least one revision")
    }

    /// Provider covering every byte of the document.
    pub(crate) fn current_provider(&self) -> SharedProvider {
        self.data
            .last()
            .expect("document has at least one revision")
            .provider
            .clone()
    }

    /// Number of stored revisions (the open editing revision excluded).
    pub fn updates(&self) -> usize {
        self.index.len() - 1
    }

    /// Highest object number known to the newest revision.
    pub fn max_object_num(&self) -> u32 {
        self.current_index().max_object_num()
    }

    /// Object numbers that resolve to content in the newest revision.
    pub fn in_use(&self) -> Vec<u32> {
        self.current_index().in_use_numbers()
    }

    /// Opens a fresh editing revision on top of the (closed) newest one.
    pub(crate) fn open_revision(&self) -> PDFResult<PDFDocument> {
        let last = self.current_index();
        let last_data = self.data.last().expect("revision data");
        let start = last_data.eof_cut.ok_or_else(|| {
            PDFError::mutation("cannot open a revision over an unwritten one")
        })?;
        let ver = self.index.len() as u32;

        let provider = last_data.provider.clone();
        let mut trailer_dict = read_trailer_union(&provider, last)?;
        // The update's trailer points back at the newest xref structure
        let prev = last
            .trailer
            .last()
            .and_then(|t| t.xref_table_pos.or(t.xref_stream_pos));
        if let Some(prev) = prev {
            trailer_dict.insert("/Prev".to_string(), PDFObject::Integer(prev as i64));
        }
        trailer_dict.shift_remove("/XRefStm");

        let new_rev = RevisionIndex {
            trailer: vec![TrailerEntry {
                o_ver: ver,
                doc_ver: ver,
                ..Default::default()
            }],
            entries: last.entries.clone(),
            eof_pos: None,
        };
        let mut cache = vec![None; new_rev.entries.len()];
        cache[0] = Some(Rc::new(PDFObject::Dictionary(trailer_dict)));

        let mut doc = self.clone();
        doc.index.push(Rc::new(new_rev));
        doc.cache = cache;
        doc.data.push(RevisionData {
            provider,
            start,
            eof_cut: None,
            bytes: None,
        });
        Ok(doc)
    }

    /// Lists the staged changes of the open revision, ascending by object
    /// number.
    pub fn changes(&self) -> Vec<(u32, ChangeKind)> {
        let rev = (self.index.len() - 1) as u32;
        let current = self.current_index();
        let mut result = Vec::new();
        for (num, slot) in current.entries.iter().enumerate().skip(1) {
            if let Some(entry) = slot {
                match entry.kind {
                    EntryKind::Staged | EntryKind::StagedEmbedded { .. } => {
                        result.push((num as u32, ChangeKind::Upsert))
                    }
                    EntryKind::Deleted if entry.doc_ver == rev => {
                        result.push((num as u32, ChangeKind::Delete))
                    }
                    _ => {}
                }
            }
        }
        result
    }

    /// Fills the cache slot for `num` from the newest revision.
    ///
    /// Embedded objects populate every sibling of their container in one
    /// pass; deleted and free slots stay empty.
    pub(crate) fn memoize(&mut self, num: u32) -> PDFResult<()> {
        if self
            .cache
            .get(num as usize)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
        {
            return Ok(());
        }
        let Some(entry) = self.current_index().get(num).cloned() else {
            return Ok(());
        };
        match entry.kind {
            EntryKind::Deleted | EntryKind::Free { .. } => Ok(()),
            EntryKind::Staged | EntryKind::StagedEmbedded { .. } => Ok(()),
            EntryKind::InUse { abs_pos, abs_next } | EntryKind::XrefStream { abs_pos, abs_next } => {
                if abs_next <= abs_pos {
                    return Err(PDFError::xref(
                        abs_pos as usize,
                        format!("empty byte range for object {}", num),
                    ));
                }
                let slice = self
                    .current_provider()
                    .borrow_mut()
                    .read(abs_pos as i64, (abs_next - abs_pos) as i64)?;
                let (parsed_num, _gen, object, _) = parse_indirect_object(&slice, 0)?;
                if parsed_num != num {
                    warn!(
                        "object number mismatch at offset {}: expected {}, found {}",
                        abs_pos, num, parsed_num
                    );
                }
                self.cache_put(num, object);
                Ok(())
            }
            EntryKind::Embedded { env_num, .. } => {
                self.memoize(env_num)?;
                let container = self
                    .cache
                    .get(env_num as usize)
                    .and_then(|slot| slot.clone())
                    .ok_or_else(|| {
                        PDFError::xref(0, format!("object stream {} unavailable", env_num))
                    })?;
                let stream = container.as_stream().ok_or_else(|| {
                    PDFError::xref(0, format!("object {} is not an object stream", env_num))
                })?;
                match stream.entries.get("/Type").and_then(|o| o.as_name()) {
                    Some("/ObjStm") => {}
                    other => {
                        return Err(PDFError::xref(
                            0,
                            format!("container {} has /Type {:?}, expected /ObjStm", env_num, other),
                        ))
                    }
                }
                // One pass fills every embedded sibling
                for (child_num, child) in parse_objstm(stream)? {
                    let belongs = matches!(
                        self.current_index().get(child_num).map(|e| &e.kind),
                        Some(EntryKind::Embedded { env_num: e, .. }) if *e == env_num
                    );
                    if belongs {
                        self.cache_put(child_num, child);
                    }
                }
                Ok(())
            }
        }
    }

    pub(crate) fn cache_put(&mut self, num: u32, object: PDFObject) {
        let idx = num as usize;
        if self.cache.len() <= idx {
            self.cache.resize(idx + 1, None);
        }
        if self.cache[idx].is_none() {
            self.cache[idx] = Some(Rc::new(object));
        }
    }

    /// Returns the target of an indirect reference, or a deep copy of a
    /// direct value. Deleted and unknown references resolve to null.
    pub fn get_object(&mut self, obj: &PDFObject) -> PDFResult<PDFObject> {
        let Some((num, _gen)) = obj.as_reference() else {
            return Ok(obj.clone());
        };
        self.get_indirect(num)
    }

    /// Returns the object stored under `num` in the newest revision.
    pub fn get_indirect(&mut self, num: u32) -> PDFResult<PDFObject> {
        match self.current_index().get(num).map(|e| &e.kind) {
            None => return Ok(PDFObject::Null),
            Some(EntryKind::Deleted) | Some(EntryKind::Free { .. }) => {
                return Ok(PDFObject::Null)
            }
            _ => {}
        }
        self.memoize(num)?;
        Ok(self
            .cache
            .get(num as usize)
            .and_then(|slot| slot.as_deref())
            .cloned()
            .unwrap_or(PDFObject::Null))
    }

    /// Resolves a dictionary entry through at most one reference hop.
    pub fn dict_get(&mut self, dict: &Dict, key: &str) -> PDFResult<Option<PDFObject>> {
        match dict.get(key) {
            None => Ok(None),
            Some(value) => Ok(Some(self.get_object(&value.clone())?)),
        }
    }

    /// The trailer dictionary of the newest revision.
    pub fn trailer(&mut self) -> PDFResult<Dict> {
        if self.cache.first().map(|s| s.is_none()).unwrap_or(true) {
            let dict = read_trailer_union(&self.current_provider(), self.current_index())?;
            self.cache_put(0, PDFObject::Dictionary(dict));
        }
        match self.cache[0].as_deref() {
            Some(PDFObject::Dictionary(d)) => Ok(d.clone()),
            _ => Err(PDFError::xref(0, "trailer is not a dictionary")),
        }
    }

    /// The document catalog (`/Root`).
    pub fn catalog(&mut self) -> PDFResult<Dict> {
        let trailer = self.trailer()?;
        let root = trailer
            .get("/Root")
            .cloned()
            .ok_or_else(|| PDFError::xref(0, "trailer has no /Root"))?;
        match self.get_object(&root)? {
            PDFObject::Dictionary(d) => Ok(d),
            other => Err(PDFError::xref(0, format!("catalog is {:?}", other))),
        }
    }

    /// The `/Info` dictionary, if present.
    pub fn info(&mut self) -> PDFResult<Option<Dict>> {
        let trailer = self.trailer()?;
        match trailer.get("/Info").cloned() {
            None => Ok(None),
            Some(info_ref) => match self.get_object(&info_ref)? {
                PDFObject::Dictionary(d) => Ok(Some(d)),
                _ => Ok(None),
            },
        }
    }

    /// The document version: the header version, overridden by a higher
    /// catalog `/Version`.
    pub fn version(&mut self) -> PDFResult<String> {
        let head = self.data[0].provider.borrow_mut().read(0, 16)?;
        if !head.starts_with(b"%PDF-") || head.len() < 8 {
            return Err(PDFError::parse(0, "missing %PDF header"));
        }
        let mut version = String::from_utf8_lossy(&head[5..8]).into_owned();
        if let Ok(catalog) = self.catalog() {
            if let Some(v) = catalog.get("/Version").and_then(|o| o.as_name()) {
                let v = v.trim_start_matches('/');
                if v > version.as_str() {
                    version = v.to_string();
                }
            }
        }
        Ok(version)
    }

    /// True when the trailer carries `/Encrypt`.
    pub fn encrypted(&mut self) -> PDFResult<bool> {
        Ok(self.trailer()?.contains_key("/Encrypt"))
    }

    /// True when any revision pairs a classic table with an `/XRefStm`.
    pub fn hybrid(&self) -> bool {
        self.index
            .iter()
            .any(|rev| rev.trailer.iter().any(|t| t.xref_stm))
    }

    /// True when the file starts with a linearization dictionary.
    pub fn linearized(&mut self) -> PDFResult<bool> {
        let head = self.data[0].provider.borrow_mut().read(0, 2048)?;
        Ok(linearized_dict(&head).is_some())
    }

    /// Number of pages, from the page-tree root's `/Count`.
    pub fn number_pages(&mut self) -> PDFResult<i64> {
        let catalog = self.catalog()?;
        let pages = self
            .dict_get(&catalog, "/Pages")?
            .ok_or_else(|| PDFError::xref(0, "catalog has no /Pages"))?;
        let dict = pages
            .as_dict()
            .ok_or_else(|| PDFError::xref(0, "/Pages is not a dictionary"))?;
        dict.get("/Count")
            .and_then(|o| o.as_int())
            .ok_or_else(|| PDFError::xref(0, "/Pages has no numeric /Count"))
    }

    /// Structure summary: version, pages, revisions, flags, paper size.
    pub fn structure(&mut self) -> PDFResult<IndexMap<String, String>> {
        let mut ret = IndexMap::new();
        ret.insert("Version".to_string(), self.version()?);
        ret.insert("Pages".to_string(), self.number_pages()?.to_string());
        ret.insert("Revisions".to_string(), self.updates().to_string());
        let yesno = |b: bool| (if b { "yes" } else { "no" }).to_string();
        ret.insert("Encrypted".to_string(), yesno(self.encrypted()?));
        ret.insert("Hybrid".to_string(), yesno(self.hybrid()));
        ret.insert("Linearized".to_string(), yesno(self.linearized()?));
        let layouts = super::page::page_layouts(self)?;
        if let Some((mediabox, _)) = layouts.first() {
            ret.insert(
                "Paper of 1st page".to_string(),
                super::page::paper(mediabox),
            );
        }
        Ok(ret)
    }

    /// Metadata from the `/Info` dictionary, decoded to text.
    pub fn metadata(&mut self) -> PDFResult<IndexMap<String, Option<String>>> {
        let mut ret = IndexMap::new();
        let info = self.info()?.unwrap_or_default();
        let mut keys: Vec<&str> = METADATA_ATTRS.to_vec();
        keys.push("/CreationDate");
        keys.push("/ModDate");
        for key in keys {
            let value = match self.dict_get(&info, key)? {
                Some(obj) => obj.as_string_bytes().map(text_string),
                None => None,
            };
            ret.insert(key[1..].to_string(), value);
        }
        Ok(ret)
    }

    /// Entry accessor used by mutation code and the CLI.
    pub fn index_entry(&self, num: u32) -> Option<IndexEntry> {
        self.current_index().get(num).cloned()
    }
}

/// Minimal one-page document with computed offsets, shared by the unit
/// suites of the mutation and writer modules.
#[cfg(test)]
pub(crate) fn minimal_pdf() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::new();
    offsets.push(data.len());
    data.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    offsets.push(data.len());
    data.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
    offsets.push(data.len());
    data.extend_from_slice(
        b"3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>\nendobj\n",
    );
    let xref = data.len();
    data.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    data.extend_from_slice(b"0000000000 65535 f \n");
    for off in &offsets {
        data.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    data.extend_from_slice(b"trailer\n<< /Size 4 /Root 1 0 R >>\n");
    data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pdf() -> Vec<u8> {
        super::minimal_pdf()
    }

    #[test]
    fn test_load_minimal() {
        let doc = PDFDocument::load(minimal_pdf()).unwrap();
        // One written revision plus the open editing revision
        assert_eq!(doc.index.len(), 2);
        assert_eq!(doc.updates(), 1);
        assert_eq!(doc.max_object_num(), 3);
        assert_eq!(doc.in_use(), vec![1, 2, 3]);
    }

    #[test]
    fn test_trailer_and_catalog() {
        let mut doc = PDFDocument::load(minimal_pdf()).unwrap();
        let trailer = doc.trailer().unwrap();
        assert_eq!(trailer.get("/Root"), Some(&PDFObject::reference(1)));
        // The open revision's trailer points back at the first xref
        assert!(trailer.contains_key("/Prev"));

        let catalog = doc.catalog().unwrap();
        assert_eq!(catalog.get("/Type"), Some(&PDFObject::name("Catalog")));
    }

    #[test]
    fn test_get_object() {
        let mut doc = PDFDocument::load(minimal_pdf()).unwrap();
        let page = doc.get_indirect(3).unwrap();
        let dict = page.as_dict().unwrap();
        assert_eq!(dict.get("/Type"), Some(&PDFObject::name("Page")));
        assert_eq!(
            dict.get("/Parent"),
            Some(&PDFObject::Reference { num: 2, gen: 0 })
        );
        // Direct values come back as deep copies
        let direct = doc.get_object(&PDFObject::Integer(9)).unwrap();
        assert_eq!(direct, PDFObject::Integer(9));
        // Unknown numbers resolve to null
        assert!(doc.get_indirect(99).unwrap().is_null());
    }

    #[test]
    fn test_memoize_fills_slot_once() {
        let mut doc = PDFDocument::load(minimal_pdf()).unwrap();
        doc.memoize(1).unwrap();
        let first = doc.cache[1].clone().unwrap();
        doc.memoize(1).unwrap();
        let second = doc.cache[1].clone().unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_version_and_flags() {
        let mut doc = PDFDocument::load(minimal_pdf()).unwrap();
        assert_eq!(doc.version().unwrap(), "1.4");
        assert!(!doc.encrypted().unwrap());
        assert!(!doc.hybrid());
        assert!(!doc.linearized().unwrap());
        assert_eq!(doc.number_pages().unwrap(), 1);
    }

    #[test]
    fn test_structure_summary() {
        let mut doc = PDFDocument::load(minimal_pdf()).unwrap();
        let s = doc.structure().unwrap();
        assert_eq!(s.get("Version"), Some(&"1.4".to_string()));
        assert_eq!(s.get("Pages"), Some(&"1".to_string()));
        assert_eq!(s.get("Revisions"), Some(&"1".to_string()));
        assert!(s.get("Paper of 1st page").unwrap().contains("US Letter"));
    }

    #[test]
    fn test_changes_empty_after_load() {
        let doc = PDFDocument::load(minimal_pdf()).unwrap();
        assert!(doc.changes().is_empty());
    }

    #[test]
    fn test_eof_cut() {
        let data = minimal_pdf();
        let doc = PDFDocument::load(data.clone()).unwrap();
        assert_eq!(doc.data[0].eof_cut, Some(data.len() as u64));
        assert_eq!(doc.data[1].start, data.len() as u64);
    }
}
