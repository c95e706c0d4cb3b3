use std::fmt;

/// Universal error type for PDF file operations.
///
/// Every failure that can surface from parsing, cross-reference
/// reconstruction, stream codecs, mutations or the byte provider is a
/// variant of this enum, carrying enough context (usually a byte offset)
/// to point at the culprit in the file.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFError {
    /// End of data reached while a token or region was still open
    UnexpectedEndOfData { offset: usize },

    /// Unexpected bytes, unbalanced delimiters, malformed number/name/string,
    /// or an unknown region at a top-level offset
    Parse { offset: usize, reason: String },

    /// Inconsistent cross-reference structure (bad widths, out-of-range
    /// object number, broken /Prev chain, missing trailer)
    Xref { offset: usize, reason: String },

    /// Stream filter failure. Non-fatal while loading (the decoded bytes
    /// become a tagged failure); fatal when re-encoding on write.
    Filter { filter: String, reason: String },

    /// Invalid mutation request (nonexistent object, removing the last
    /// page, occupied slot)
    Mutation { reason: String },

    /// Byte provider read past end, or an OS-level read failure
    Io { reason: String },
}

impl fmt::Display for PDFError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PDFError::UnexpectedEndOfData { offset } => {
                write!(f, "Unexpected end of data at offset {}", offset)
            }
            PDFError::Parse { offset, reason } => {
                write!(f, "Parse error at offset {}: {}", offset, reason)
            }
            PDFError::Xref { offset, reason } => {
                write!(f, "Cross-reference error at offset {}: {}", offset, reason)
            }
            PDFError::Filter { filter, reason } => {
                write!(f, "Filter error ({}): {}", filter, reason)
            }
            PDFError::Mutation { reason } => {
                write!(f, "Mutation error: {}", reason)
            }
            PDFError::Io { reason } => {
                write!(f, "I/O error: {}", reason)
            }
        }
    }
}

impl PDFError {
    /// Creates a parse error at a byte offset.
    pub fn parse<S: Into<String>>(offset: usize, reason: S) -> Self {
        PDFError::Parse {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a cross-reference error at the xref start offset.
    pub fn xref<S: Into<String>>(offset: usize, reason: S) -> Self {
        PDFError::Xref {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a filter error.
    pub fn filter<S: Into<String>>(filter: S, reason: S) -> Self {
        PDFError::Filter {
            filter: filter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a mutation error.
    pub fn mutation<S: Into<String>>(reason: S) -> Self {
        PDFError::Mutation {
            reason: reason.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io<S: Into<String>>(reason: S) -> Self {
        PDFError::Io {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for PDFError {
    fn from(e: std::io::Error) -> Self {
        PDFError::Io {
            reason: e.to_string(),
        }
    }
}

impl std::error::Error for PDFError {}

/// Result type alias for PDF operations
pub type PDFResult<T> = Result<T, PDFError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PDFError::parse(42, "unbalanced brackets");
        assert_eq!(
            format!("{}", err),
            "Parse error at offset 42: unbalanced brackets"
        );

        let err = PDFError::xref(1024, "bad /W widths");
        assert_eq!(
            format!("{}", err),
            "Cross-reference error at offset 1024: bad /W widths"
        );

        let err = PDFError::filter("/FlateDecode", "corrupt zlib header");
        assert_eq!(
            format!("{}", err),
            "Filter error (/FlateDecode): corrupt zlib header"
        );

        let err = PDFError::mutation("object 99 does not exist");
        assert_eq!(format!("{}", err), "Mutation error: object 99 does not exist");
    }

    #[test]
    fn test_error_creation_methods() {
        let err = PDFError::parse(7, "test");
        match err {
            PDFError::Parse { offset, reason } => {
                assert_eq!(offset, 7);
                assert_eq!(reason, "test");
            }
            _ => panic!("Expected Parse"),
        }

        let err = PDFError::io("short read");
        match err {
            PDFError::Io { reason } => assert_eq!(reason, "short read"),
            _ => panic!("Expected Io"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: PDFError = io_err.into();
        assert!(matches!(err, PDFError::Io { .. }));
    }

    #[test]
    fn test_error_chain_compatibility() {
        let err = PDFError::io("file not found");
        let _dyn_err: &dyn std::error::Error = &err;

        let result: PDFResult<()> = Err(err);
        assert!(result.is_err());
    }
}
