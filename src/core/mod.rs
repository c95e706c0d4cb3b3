pub mod bdata;
pub mod document;
pub mod edit;
pub mod error;
pub mod filters;
pub mod lexer;
pub mod object;
pub mod page;
pub mod parser;
pub mod regions;
pub mod strings;
pub mod writer;
pub mod xref;

pub use bdata::{hexdump, share, ByteProvider, CompositeProvider, FileProvider, MemoryProvider, SharedProvider};
pub use document::{ChangeKind, PDFDocument, RevisionData};
pub use error::{PDFError, PDFResult};
pub use lexer::{next_token, Token, TokenKind};
pub use object::{Decoded, Dict, PDFObject, StreamObject};
pub use regions::{scan_regions, Region};
pub use writer::{XrefFlavor, XrefStreamFilter};
pub use xref::{
    check_dangling_entries, check_unindexed_objects, xref_stream_records, EntryKind, IndexEntry,
    RevisionIndex, TrailerEntry, XrefRecord, XrefRecordKind,
};
