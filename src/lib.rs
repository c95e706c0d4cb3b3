pub mod core;

// Re-export main types for convenience
pub use core::{
    ByteProvider, Decoded, Dict, EntryKind, FileProvider, IndexEntry, MemoryProvider,
    PDFDocument, PDFError, PDFObject, PDFResult, Region, RevisionIndex, StreamObject,
};
