use super::error::{PDFError, PDFResult};
use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::rc::Rc;
use std::sync::Arc;

/// Abstraction over the bytes backing a PDF file.
///
/// Implementations serve random-access reads from whatever storage holds
/// the document: a fully loaded buffer, a file handle that re-seeks on
/// every call, or a composite of already-stored bytes plus an appended
/// in-memory revision.
///
/// Conventions shared by all implementations:
/// - a negative `start` addresses from the end of the data
///   (`-1` is the last byte)
/// - `length == -1` means "through the end"
/// - reads are clamped to the available size; reading at or past the end
///   is an error
/// - repeated reads are independent; there is no shared cursor
pub trait ByteProvider {
    /// Returns the total size without transferring any content.
    fn len(&mut self) -> PDFResult<u64>;

    /// Returns true if the provider holds no bytes.
    fn is_empty(&mut self) -> PDFResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads up to `length` bytes starting at `start`.
    fn read(&mut self, start: i64, length: i64) -> PDFResult<Vec<u8>>;

    /// Reads the whole content.
    fn read_all(&mut self) -> PDFResult<Vec<u8>> {
        self.read(0, -1)
    }

    /// Reads the last `n` bytes (fewer if the data is shorter).
    fn tail(&mut self, n: u64) -> PDFResult<Vec<u8>> {
        let size = self.len()?;
        let start = size.saturating_sub(n);
        if size == 0 {
            return Ok(Vec::new());
        }
        self.read(start as i64, -1)
    }
}

/// Shared handle to a provider; revisions of the same document alias it.
pub type SharedProvider = Rc<RefCell<Box<dyn ByteProvider>>>;

/// Wraps a provider implementation into a shared handle.
pub fn share<P: ByteProvider + 'static>(provider: P) -> SharedProvider {
    Rc::new(RefCell::new(Box::new(provider)))
}

/// Resolves a possibly negative start against a total size, clamping a
/// tail request larger than the data to the beginning.
fn resolve_start(start: i64, size: u64) -> PDFResult<u64> {
    if start >= 0 {
        let start = start as u64;
        if start > size {
            return Err(PDFError::io(format!(
                "read start {} past end of data ({} bytes)",
                start, size
            )));
        }
        Ok(start)
    } else {
        let back = start.unsigned_abs();
        Ok(size.saturating_sub(back))
    }
}

/// Resolves a length request against the bytes remaining after `start`.
fn resolve_length(length: i64, start: u64, size: u64) -> u64 {
    let available = size - start;
    if length < 0 {
        available
    } else {
        available.min(length as u64)
    }
}

/// Provider over a fully loaded byte buffer.
///
/// The buffer is shared via `Arc` so cloned handles and sub-views never
/// copy the underlying data.
pub struct MemoryProvider {
    bytes: Arc<Vec<u8>>,
}

impl MemoryProvider {
    /// Creates a provider owning the given bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        MemoryProvider {
            bytes: Arc::new(bytes),
        }
    }

    /// Creates a provider over an already shared buffer.
    pub fn from_arc(bytes: Arc<Vec<u8>>) -> Self {
        MemoryProvider { bytes }
    }
}

impl ByteProvider for MemoryProvider {
    fn len(&mut self) -> PDFResult<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn read(&mut self, start: i64, length: i64) -> PDFResult<Vec<u8>> {
        let size = self.bytes.len() as u64;
        let start = resolve_start(start, size)?;
        let nb = resolve_length(length, start, size);
        let begin = start as usize;
        let end = begin + nb as usize;
        Ok(self.bytes[begin..end].to_vec())
    }
}

/// Provider over an open file, seeking on demand.
///
/// Every read re-seeks, so callers may interleave reads at arbitrary
/// positions without coordinating a cursor.
pub struct FileProvider {
    file: File,
}

impl FileProvider {
    /// Opens the file at `path`.
    pub fn open(path: &str) -> PDFResult<Self> {
        let file = File::open(path)?;
        Ok(FileProvider { file })
    }

    /// Wraps an already open file handle.
    pub fn new(file: File) -> Self {
        FileProvider { file }
    }
}

impl ByteProvider for FileProvider {
    fn len(&mut self) -> PDFResult<u64> {
        Ok(self.file.seek(SeekFrom::End(0))?)
    }

    fn read(&mut self, start: i64, length: i64) -> PDFResult<Vec<u8>> {
        let size = self.len()?;
        let start = resolve_start(start, size)?;
        let nb = resolve_length(length, start, size);
        self.file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; nb as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Provider composing an inner provider with bytes appended at `cut`.
///
/// After a revision is committed in memory, reads below `cut` keep hitting
/// the original storage while reads at or beyond it serve the appended
/// fragment, so the document sees one continuous byte sequence.
pub struct CompositeProvider {
    inner: SharedProvider,
    cut: u64,
    appended: Arc<Vec<u8>>,
}

impl CompositeProvider {
    pub fn new(inner: SharedProvider, cut: u64, appended: Vec<u8>) -> Self {
        CompositeProvider {
            inner,
            cut,
            appended: Arc::new(appended),
        }
    }
}

impl ByteProvider for CompositeProvider {
    fn len(&mut self) -> PDFResult<u64> {
        Ok(self.cut + self.appended.len() as u64)
    }

    fn read(&mut self, start: i64, length: i64) -> PDFResult<Vec<u8>> {
        let size = self.len()?;
        let start = resolve_start(start, size)?;
        let nb = resolve_length(length, start, size);
        let end = start + nb;
        if end <= self.cut {
            return self.inner.borrow_mut().read(start as i64, nb as i64);
        }
        if start >= self.cut {
            let begin = (start - self.cut) as usize;
            let stop = (end - self.cut) as usize;
            return Ok(self.appended[begin..stop].to_vec());
        }
        // Read spans the cut: stitch both halves
        let mut buf = self
            .inner
            .borrow_mut()
            .read(start as i64, (self.cut - start) as i64)?;
        buf.extend_from_slice(&self.appended[..(end - self.cut) as usize]);
        Ok(buf)
    }
}

/// Builds a string similar to `hexdump -C` for binary exploration.
///
/// Offsets are decimal, ten bytes per line, with a printable-ASCII column
/// where non-printable bytes show as dots.
pub fn hexdump(provider: &SharedProvider, start: Option<u64>, stop: Option<u64>) -> PDFResult<String> {
    const LN: usize = 10;
    let mut provider = provider.borrow_mut();
    let size = provider.len()?;
    let start = start.unwrap_or(0).min(size);
    let stop = stop.unwrap_or(size).min(size);
    if stop <= start {
        return Ok(String::new());
    }
    // Align the window to the line grid so offsets stay stable
    let aligned = (start as usize / LN) * LN;
    let buf = provider.read(aligned as i64, (stop - aligned as u64) as i64)?;
    let mut ret = String::new();
    let mut i = 0;
    while i < buf.len() {
        let line = &buf[i..(i + LN).min(buf.len())];
        let hexl: Vec<String> = line.iter().map(|b| format!("{:02x}", b)).collect();
        let text: String = line
            .iter()
            .map(|&c| if (0x20..=0x7e).contains(&c) { c as char } else { '.' })
            .collect();
        ret.push_str(&format!(
            "{:010}  {:29}  |{}|\n",
            aligned + i,
            hexl.join(" "),
            text
        ));
        i += LN;
    }
    Ok(ret)
}
