use super::bdata::{share, CompositeProvider, MemoryProvider};
use super::document::{ChangeKind, PDFDocument, RevisionData};
use super::error::{PDFError, PDFResult};
use super::filters::DECODED_FILTERS;
use super::object::{Decoded, Dict, PDFObject, StreamObject};
use super::page::flat_page_tree;
use super::writer::{build_revision, XrefFlavor, XrefStreamFilter};
use super::xref::{EntryKind, IndexEntry, RevisionIndex, TrailerEntry};
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;

/// Rewrites every indirect reference of `obj` through the renumbering
/// map; unmapped references pass through unchanged.
pub(crate) fn rename_refs(obj: PDFObject, map: &FxHashMap<u32, u32>) -> PDFObject {
    match obj {
        PDFObject::Reference { num, gen } => match map.get(&num) {
            Some(&new_num) => PDFObject::Reference {
                num: new_num,
                gen: 0,
            },
            None => PDFObject::Reference { num, gen },
        },
        PDFObject::Array(items) => {
            PDFObject::Array(items.into_iter().map(|o| rename_refs(o, map)).collect())
        }
        PDFObject::Dictionary(dict) => PDFObject::Dictionary(
            dict.into_iter()
                .map(|(k, v)| (k, rename_refs(v, map)))
                .collect(),
        ),
        PDFObject::Stream(stream) => PDFObject::Stream(StreamObject {
            entries: stream
                .entries
                .into_iter()
                .map(|(k, v)| (k, rename_refs(v, map)))
                .collect(),
            encoded: stream.encoded,
            decoded: stream.decoded,
        }),
        other => other,
    }
}

impl PDFDocument {
    /// Replaces the index of the open revision via copy-on-write.
    fn with_current_index<F>(&self, mutate: F) -> PDFDocument
    where
        F: FnOnce(&mut RevisionIndex),
    {
        let mut doc = self.clone();
        let last = doc.index.len() - 1;
        let mut revision = (*doc.index[last]).clone();
        mutate(&mut revision);
        doc.index[last] = Rc::new(revision);
        doc
    }

    /// Stores a new version of object `num` in the open revision.
    pub fn update_object(&self, num: u32, object: PDFObject) -> PDFResult<PDFDocument> {
        let rev = (self.index.len() - 1) as u32;
        let entry = self
            .current_index()
            .get(num)
            .cloned()
            .ok_or_else(|| PDFError::mutation(format!("object {} does not exist", num)))?;
        if matches!(entry.kind, EntryKind::XrefStream { .. }) {
            return Err(PDFError::mutation(format!(
                "object {} hosts a cross-reference stream",
                num
            )));
        }
        let mut doc = self.with_current_index(|revision| {
            revision.entries[num as usize] = Some(IndexEntry {
                o_num: num,
                o_gen: entry.o_gen,
                o_ver: entry.o_ver + 1,
                doc_ver: rev,
                kind: EntryKind::Staged,
            });
        });
        doc.cache[num as usize] = Some(Rc::new(object));
        Ok(doc)
    }

    /// Marks object `num` deleted; it joins the free chain at commit.
    pub fn delete_object(&self, num: u32) -> PDFResult<PDFDocument> {
        let rev = (self.index.len() - 1) as u32;
        let entry = self
            .current_index()
            .get(num)
            .cloned()
            .ok_or_else(|| PDFError::mutation(format!("object {} does not exist", num)))?;
        let mut doc = self.with_current_index(|revision| {
            revision.entries[num as usize] = Some(IndexEntry {
                o_num: num,
                o_gen: entry.o_gen,
                o_ver: entry.o_ver + 1,
                doc_ver: rev,
                kind: EntryKind::Deleted,
            });
        });
        doc.cache[num as usize] = None;
        Ok(doc)
    }

    /// Appends a new object; freed numbers are never reused.
    ///
    /// Returns the new document and a reference to the added object.
    pub fn add_object(&self, object: PDFObject) -> PDFResult<(PDFDocument, PDFObject)> {
        let rev = (self.index.len() - 1) as u32;
        let num = self.current_index().entries.len() as u32;
        let mut doc = self.with_current_index(|revision| {
            revision.entries.push(Some(IndexEntry {
                o_num: num,
                o_gen: 0,
                o_ver: 0,
                doc_ver: rev,
                kind: EntryKind::Staged,
            }));
        });
        doc.cache.push(Some(Rc::new(object)));
        Ok((doc, PDFObject::reference(num)))
    }

    /// Finalizes the open revision and opens a fresh one.
    ///
    /// With no staged changes this is a no-op. The xref flavor follows
    /// the document version: classic tables below 1.5, xref streams from
    /// 1.5 on.
    pub fn commit(&mut self) -> PDFResult<PDFDocument> {
        self.commit_with(None)
    }

    pub(crate) fn commit_with(&mut self, flavor: Option<XrefFlavor>) -> PDFResult<PDFDocument> {
        let changes = self.changes();
        if changes.is_empty() {
            return Ok(self.clone());
        }
        for (num, kind) in &changes {
            if *kind == ChangeKind::Upsert {
                self.memoize(*num)?;
            }
        }
        let flavor = match flavor {
            Some(f) => f,
            None => {
                if self.version()?.as_str() >= "1.5" {
                    XrefFlavor::Stream {
                        filter: XrefStreamFilter::AsciiHex,
                    }
                } else {
                    XrefFlavor::Table
                }
            }
        };
        let last = self.index.len() - 1;
        let start = self.data[last].start;
        let (bytes, new_revision) =
            build_revision(&changes, self.current_index(), &self.cache, start, flavor)?;

        let mut doc = self.clone();
        doc.index[last] = Rc::new(new_revision);
        let base = doc.data[last].provider.clone();
        let eof_cut = start + bytes.len() as u64;
        let provider = share(CompositeProvider::new(base, start, bytes.clone()));
        doc.data[last] = RevisionData {
            provider,
            start,
            eof_cut: Some(eof_cut),
            bytes: Some(Rc::new(bytes)),
        };
        doc.open_revision()
    }

    /// Serializes the document: prior revisions verbatim, the committed
    /// update appended. Returns the committed document and the bytes.
    pub fn save(&mut self) -> PDFResult<(PDFDocument, Vec<u8>)> {
        let doc = self.commit()?;
        let closed = &doc.data[doc.data.len() - 2];
        let cut = closed
            .eof_cut
            .ok_or_else(|| PDFError::mutation("revision below the open one is unwritten"))?;
        let bytes = closed.provider.borrow_mut().read(0, cut as i64)?;
        Ok((doc, bytes))
    }

    /// Writes the document to a file.
    pub fn save_file(&mut self, path: &str) -> PDFResult<PDFDocument> {
        let (doc, bytes) = self.save()?;
        std::fs::write(path, bytes)?;
        Ok(doc)
    }

    /// Document with only the first `n` revisions; the cache restarts
    /// empty and refills from the remaining bytes.
    fn truncated(&self, n: usize) -> PDFDocument {
        let index: Vec<_> = self.index[..n].to_vec();
        let data: Vec<_> = self.data[..n].to_vec();
        let cache = vec![None; index[n - 1].entries.len()];
        PDFDocument { index, cache, data }
    }

    /// Drops the newest revision.
    ///
    /// Staged changes are discarded when present; otherwise the newest
    /// committed revision is removed. Either way the result ends with a
    /// fresh editing revision over the prior state.
    pub fn rewind(&mut self) -> PDFResult<PDFDocument> {
        if !self.changes().is_empty() {
            if self.index.len() == 1 {
                return Err(PDFError::mutation("cannot rewind the only revision"));
            }
            return self.truncated(self.index.len() - 1).open_revision();
        }
        if self.index.len() < 3 {
            // Only the base revision and its empty editing revision remain
            return Ok(self.clone());
        }
        self.truncated(self.index.len() - 2).open_revision()
    }

    /// Recursively collects the indirect-reference closure of `obj`,
    /// skipping `/Parent` and `/P` back-edges.
    pub(crate) fn dependencies(
        &mut self,
        obj: &PDFObject,
        out: &mut FxHashSet<u32>,
    ) -> PDFResult<()> {
        match obj {
            PDFObject::Reference { num, .. } => {
                if out.insert(*num) {
                    let target = self.get_indirect(*num)?;
                    self.dependencies(&target, out)?;
                }
            }
            PDFObject::Array(items) => {
                for item in items.clone() {
                    self.dependencies(&item, out)?;
                }
            }
            PDFObject::Dictionary(dict) => {
                for (key, value) in dict.clone() {
                    if key == "/Parent" || key == "/P" {
                        continue;
                    }
                    self.dependencies(&value, out)?;
                }
            }
            PDFObject::Stream(stream) => {
                for (key, value) in stream.entries.clone() {
                    if key == "/Parent" || key == "/P" {
                        continue;
                    }
                    self.dependencies(&value, out)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Removes the listed pages (0-based indices), rewriting `/Kids` and
    /// `/Count` up the tree and deleting objects no kept page needs.
    pub fn remove_pages(&mut self, pages: &[usize]) -> PDFResult<PDFDocument> {
        let tree = flat_page_tree(self)?;
        let total = tree.len();
        for &p in pages {
            if p >= total {
                return Err(PDFError::mutation(format!(
                    "page index {} out of range ({} pages)",
                    p, total
                )));
            }
        }
        let del_idx: FxHashSet<usize> = pages.iter().copied().collect();
        if del_idx.len() >= total {
            return Err(PDFError::mutation("removing every page"));
        }
        let del_refs: FxHashSet<u32> = tree
            .iter()
            .enumerate()
            .filter(|(i, _)| del_idx.contains(i))
            .map(|(_, (num, _))| *num)
            .collect();
        let keep_refs: FxHashSet<u32> = tree
            .iter()
            .enumerate()
            .filter(|(i, _)| !del_idx.contains(i))
            .map(|(_, (num, _))| *num)
            .collect();

        let mut del_dep = FxHashSet::default();
        for &num in &del_refs {
            self.dependencies(&PDFObject::reference(num), &mut del_dep)?;
        }
        let mut keep_dep = FxHashSet::default();
        for &num in &keep_refs {
            self.dependencies(&PDFObject::reference(num), &mut keep_dep)?;
        }

        let mut doc = self.clone();
        for &num in &del_refs {
            let page = doc.get_indirect(num)?;
            let page_dict = page
                .as_dict()
                .ok_or_else(|| PDFError::mutation(format!("page {} is not a dictionary", num)))?;
            let (parent_num, _) = page_dict
                .get("/Parent")
                .and_then(|o| o.as_reference())
                .ok_or_else(|| PDFError::mutation(format!("page {} has no /Parent", num)))?;

            let mut parent = match doc.get_indirect(parent_num)? {
                PDFObject::Dictionary(d) => d,
                _ => return Err(PDFError::mutation("page parent is not a dictionary")),
            };
            if let Some(PDFObject::Array(kids)) = parent.get("/Kids") {
                let filtered: Vec<PDFObject> = kids
                    .iter()
                    .filter(|k| k.as_reference().map(|(n, _)| n) != Some(num))
                    .cloned()
                    .collect();
                parent.insert("/Kids".to_string(), PDFObject::Array(filtered));
            }
            let count = parent.get("/Count").and_then(|o| o.as_int()).unwrap_or(0);
            parent.insert("/Count".to_string(), PDFObject::Integer(count - 1));
            let mut up = parent.get("/Parent").and_then(|o| o.as_reference());
            doc = doc.update_object(parent_num, PDFObject::Dictionary(parent))?;

            // Every ancestor's /Count shrinks too
            while let Some((ancestor_num, _)) = up {
                let mut ancestor = match doc.get_indirect(ancestor_num)? {
                    PDFObject::Dictionary(d) => d,
                    _ => break,
                };
                let count = ancestor.get("/Count").and_then(|o| o.as_int()).unwrap_or(0);
                ancestor.insert("/Count".to_string(), PDFObject::Integer(count - 1));
                up = ancestor.get("/Parent").and_then(|o| o.as_reference());
                doc = doc.update_object(ancestor_num, PDFObject::Dictionary(ancestor))?;
            }
        }

        for &orphan in del_dep.difference(&keep_dep) {
            if doc.index_entry(orphan).is_some() {
                doc = doc.delete_object(orphan)?;
            }
        }
        Ok(doc)
    }

    /// Keeps only the listed pages (0-based indices).
    pub fn keep_pages(&mut self, pages: &[usize]) -> PDFResult<PDFDocument> {
        let total = flat_page_tree(self)?.len();
        let keep: FxHashSet<usize> = pages.iter().copied().collect();
        let remove: Vec<usize> = (0..total).filter(|i| !keep.contains(i)).collect();
        self.remove_pages(&remove)
    }

    /// Rotates pages by a multiple of 90 degrees (all pages when `pages`
    /// is None). Each page's `/Rotate` becomes `(old + degrees) % 360`.
    pub fn rotate(&mut self, degrees: i64, pages: Option<&[usize]>) -> PDFResult<PDFDocument> {
        if degrees % 90 != 0 {
            return Err(PDFError::mutation(format!(
                "rotation must be a multiple of 90, got {}",
                degrees
            )));
        }
        let tree = flat_page_tree(self)?;
        let targets: FxHashSet<usize> = match pages {
            Some(list) => list.iter().copied().collect(),
            None => (0..tree.len()).collect(),
        };
        let mut doc = self.clone();
        for (i, (num, inherited)) in tree.iter().enumerate() {
            if !targets.contains(&i) {
                continue;
            }
            let mut page = match doc.get_indirect(*num)? {
                PDFObject::Dictionary(d) => d,
                _ => return Err(PDFError::mutation(format!("page {} is not a dictionary", num))),
            };
            let old = page
                .get("/Rotate")
                .or_else(|| inherited.get("/Rotate"))
                .and_then(|o| o.as_int())
                .unwrap_or(0);
            page.insert(
                "/Rotate".to_string(),
                PDFObject::Integer((old + degrees).rem_euclid(360)),
            );
            doc = doc.update_object(*num, PDFObject::Dictionary(page))?;
        }
        Ok(doc)
    }

    /// Adds a simple text annotation to a page.
    pub fn add_text_annotation(
        &mut self,
        page_num: usize,
        text: &str,
        rect: [f64; 4],
    ) -> PDFResult<PDFDocument> {
        let tree = flat_page_tree(self)?;
        let &(page_obj, _) = tree.get(page_num).ok_or_else(|| {
            PDFError::mutation(format!("page index {} out of range", page_num))
        })?;

        let mut annot = Dict::new();
        annot.insert("/Type".to_string(), PDFObject::name("Annot"));
        annot.insert("/Subtype".to_string(), PDFObject::name("Text"));
        annot.insert(
            "/Rect".to_string(),
            PDFObject::Array(rect.iter().map(|&v| PDFObject::Real(v)).collect()),
        );
        annot.insert(
            "/Contents".to_string(),
            PDFObject::LiteralString(text.as_bytes().to_vec()),
        );
        annot.insert("/Open".to_string(), PDFObject::Boolean(false));

        let (mut doc, annot_ref) = self.add_object(PDFObject::Dictionary(annot))?;
        let mut page = match doc.get_indirect(page_obj)? {
            PDFObject::Dictionary(d) => d,
            _ => return Err(PDFError::mutation("page is not a dictionary")),
        };
        match page.get("/Annots").cloned() {
            Some(PDFObject::Reference { num: arr_num, .. }) => {
                let mut items = match doc.get_indirect(arr_num)? {
                    PDFObject::Array(items) => items,
                    _ => return Err(PDFError::mutation("/Annots is not an array")),
                };
                items.push(annot_ref);
                doc.update_object(arr_num, PDFObject::Array(items))
            }
            Some(PDFObject::Array(mut items)) => {
                items.push(annot_ref);
                page.insert("/Annots".to_string(), PDFObject::Array(items));
                doc.update_object(page_obj, PDFObject::Dictionary(page))
            }
            _ => {
                let (mut doc, array_ref) = doc.add_object(PDFObject::Array(vec![annot_ref]))?;
                page.insert("/Annots".to_string(), array_ref);
                doc.update_object(page_obj, PDFObject::Dictionary(page))
            }
        }
    }

    /// Object numbers of every in-use stream.
    pub fn list_streams(&mut self) -> PDFResult<Vec<u32>> {
        let mut ret = Vec::new();
        for num in self.in_use() {
            if matches!(self.get_indirect(num)?, PDFObject::Stream(_)) {
                ret.push(num);
            }
        }
        Ok(ret)
    }

    /// Re-encodes the listed streams with the given filter (`None`
    /// clears `/Filter`, storing them plain).
    pub fn apply_filter(&mut self, streams: &[u32], filter: Option<&str>) -> PDFResult<PDFDocument> {
        if let Some(f) = filter {
            if !DECODED_FILTERS.contains(&f) {
                return Err(PDFError::mutation(format!(
                    "cannot encode with filter {}",
                    f
                )));
            }
        }
        let mut doc = self.clone();
        for &num in streams {
            let stream = match doc.get_indirect(num)? {
                PDFObject::Stream(s) => s,
                _ => {
                    return Err(PDFError::mutation(format!(
                        "object {} is not a stream",
                        num
                    )))
                }
            };
            let current = stream.entries.get("/Filter").and_then(|o| o.as_name());
            if current == filter {
                continue;
            }
            let content = stream
                .decoded
                .data()
                .ok_or_else(|| {
                    PDFError::filter(
                        filter.unwrap_or("none").to_string(),
                        format!("stream {} has no decodable content", num),
                    )
                })?
                .to_vec();
            let mut entries = stream.entries.clone();
            entries.shift_remove("/DecodeParms");
            match filter {
                Some(f) => {
                    entries.insert("/Filter".to_string(), PDFObject::Name(f.to_string()));
                }
                None => {
                    entries.shift_remove("/Filter");
                }
            }
            let rebuilt = StreamObject::forge(entries, content)?;
            doc = doc.update_object(num, PDFObject::Stream(rebuilt))?;
        }
        Ok(doc)
    }

    /// Raises the catalog `/Version` entry.
    pub fn update_version(&mut self, version: &str) -> PDFResult<PDFDocument> {
        let trailer = self.trailer()?;
        let (root_num, _) = trailer
            .get("/Root")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| PDFError::mutation("trailer has no /Root reference"))?;
        let mut catalog = self.catalog()?;
        catalog.insert(
            "/Version".to_string(),
            PDFObject::Name(format!("/{}", version)),
        );
        self.update_object(root_num, PDFObject::Dictionary(catalog))
    }

    /// Collapses every revision into a single staged one: in-use objects
    /// renumbered contiguously from 1, references rewritten, the result
    /// sitting unwritten over a fresh `%PDF-<version>` header.
    pub fn squash(&mut self) -> PDFResult<PDFDocument> {
        let version = self.version()?;
        self.squash_to(&version)
    }

    pub(crate) fn squash_to(&mut self, version: &str) -> PDFResult<PDFDocument> {
        let nums = self.in_use();
        let mut map = FxHashMap::default();
        for (i, &old) in nums.iter().enumerate() {
            map.insert(old, i as u32 + 1);
        }

        let mut cache: Vec<Option<Rc<PDFObject>>> = vec![None; nums.len() + 1];
        let mut entries: Vec<Option<IndexEntry>> = vec![None];
        for (i, &old) in nums.iter().enumerate() {
            let object = self.get_indirect(old)?;
            cache[i + 1] = Some(Rc::new(rename_refs(object, &map)));
            entries.push(Some(IndexEntry {
                o_num: i as u32 + 1,
                o_gen: 0,
                o_ver: 0,
                doc_ver: 0,
                kind: EntryKind::Staged,
            }));
        }

        let mut trailer = self.trailer()?;
        for key in [
            "/Prev",
            "/Size",
            "/XRefStm",
            "/Type",
            "/W",
            "/Index",
            "/Filter",
            "/DecodeParms",
            "/Length",
        ] {
            trailer.shift_remove(key);
        }
        cache[0] = Some(Rc::new(rename_refs(PDFObject::Dictionary(trailer), &map)));

        let header = format!("%PDF-{}\n", version).into_bytes();
        let start = header.len() as u64;
        Ok(PDFDocument {
            index: vec![Rc::new(RevisionIndex {
                trailer: vec![TrailerEntry::default()],
                entries,
                eof_pos: None,
            })],
            cache,
            data: vec![RevisionData {
                provider: share(MemoryProvider::new(header)),
                start,
                eof_cut: None,
                bytes: None,
            }],
        })
    }

    /// Appends `other`'s pages after this document's pages.
    ///
    /// Both sides are squashed; `other`'s objects are renumbered past
    /// this document's, its page-tree root becomes a kid of this
    /// document's root, and the counts sum.
    pub fn concatenate(&mut self, other: &mut PDFDocument) -> PDFResult<PDFDocument> {
        let a = self.squash()?;
        let mut b = other.squash()?;
        let b_pages_count = b.number_pages()?;

        let b_trailer = b.trailer()?;
        let (b_root, _) = b_trailer
            .get("/Root")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| PDFError::mutation("second document has no /Root"))?;
        let b_catalog = b.catalog()?;
        let (b_pages_old, _) = b_catalog
            .get("/Pages")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| PDFError::mutation("second document has no /Pages"))?;

        // Dense renumber map over b, dropping its catalog
        let offset = a.max_object_num();
        let mut map = FxHashMap::default();
        let mut next = offset + 1;
        for num in b.in_use() {
            if num == b_root {
                continue;
            }
            map.insert(num, next);
            next += 1;
        }

        let mut doc = a;
        let rev = doc.index.len() - 1;
        let mut revision = (*doc.index[rev]).clone();
        for num in b.in_use() {
            if num == b_root {
                continue;
            }
            let renamed = rename_refs(b.get_indirect(num)?, &map);
            let new_num = map[&num];
            debug_assert_eq!(new_num as usize, revision.entries.len());
            revision.entries.push(Some(IndexEntry {
                o_num: new_num,
                o_gen: 0,
                o_ver: 0,
                doc_ver: 0,
                kind: EntryKind::Staged,
            }));
            doc.cache.push(Some(Rc::new(renamed)));
        }
        doc.index[rev] = Rc::new(revision);

        // Splice b's page-tree root under a's
        let b_pages_new = map[&b_pages_old];
        let a_catalog = doc.catalog()?;
        let (a_pages_num, _) = a_catalog
            .get("/Pages")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| PDFError::mutation("first document has no /Pages"))?;
        let mut a_pages = match doc.get_indirect(a_pages_num)? {
            PDFObject::Dictionary(d) => d,
            _ => return Err(PDFError::mutation("/Pages is not a dictionary")),
        };
        let mut kids = match a_pages.get("/Kids") {
            Some(PDFObject::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        kids.push(PDFObject::reference(b_pages_new));
        a_pages.insert("/Kids".to_string(), PDFObject::Array(kids));
        let count = a_pages.get("/Count").and_then(|o| o.as_int()).unwrap_or(0);
        a_pages.insert(
            "/Count".to_string(),
            PDFObject::Integer(count + b_pages_count),
        );
        let mut doc = doc.update_object(a_pages_num, PDFObject::Dictionary(a_pages))?;

        let mut b_pages = match doc.get_indirect(b_pages_new)? {
            PDFObject::Dictionary(d) => d,
            _ => return Err(PDFError::mutation("spliced /Pages is not a dictionary")),
        };
        b_pages.insert(
            "/Parent".to_string(),
            PDFObject::reference(a_pages_num),
        );
        doc.update_object(b_pages_new, PDFObject::Dictionary(b_pages))
    }

    /// Routes every staged non-stream object into one object-stream
    /// envelope, which is added to the document.
    pub fn group_objects_into_stream(&mut self) -> PDFResult<PDFDocument> {
        let mut env_entries = Dict::new();
        env_entries.insert("/Type".to_string(), PDFObject::name("ObjStm"));
        let shell = StreamObject {
            entries: env_entries,
            encoded: Vec::new(),
            decoded: Decoded::Data(Vec::new()),
        };
        let (mut doc, env_ref) = self.add_object(PDFObject::Stream(shell))?;
        let (env_num, _) = env_ref.as_reference().expect("fresh reference");

        let count = doc.current_index().entries.len() as u32;
        let mut routed = Vec::new();
        for num in 1..count {
            if num == env_num {
                continue;
            }
            let Some(entry) = doc.current_index().get(num).cloned() else {
                continue;
            };
            if !matches!(entry.kind, EntryKind::Staged) || entry.o_gen != 0 {
                continue;
            }
            let is_stream = matches!(
                doc.cache.get(num as usize).and_then(|s| s.as_deref()),
                Some(PDFObject::Stream(_))
            );
            if is_stream {
                continue;
            }
            routed.push((num, entry));
        }
        let doc = doc.with_current_index(|revision| {
            for (num, entry) in routed {
                revision.entries[num as usize] = Some(IndexEntry {
                    kind: EntryKind::StagedEmbedded { env_num },
                    ..entry
                });
            }
        });
        Ok(doc)
    }

    /// Compresses the document: squash, version at least 1.5, every
    /// eligible object grouped into one object stream, every stream
    /// Flate-encoded, and an xref stream instead of a table.
    pub fn compress(&mut self) -> PDFResult<PDFDocument> {
        let version = self.version()?;
        let target = if version.as_str() < "1.5" {
            "1.5".to_string()
        } else {
            version
        };
        let mut doc = self.squash_to(&target)?;
        let mut doc = doc.group_objects_into_stream()?;
        let streams = doc.list_streams()?;
        let mut doc = doc.apply_filter(&streams, Some("/FlateDecode"))?;
        doc.commit_with(Some(XrefFlavor::Stream {
            filter: XrefStreamFilter::Flate,
        }))
    }
}
