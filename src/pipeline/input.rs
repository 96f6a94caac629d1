//! Input validation: reject paths that cannot possibly be a PDF before any
//! rendering work starts.
//!
//! Only three conditions are fatal here: the path does not exist, it is not
//! a regular file, or it is empty. Anything else about the bytes is left to
//! the page-count strategies, which produce a more specific
//! [`ProcessingError::UnreadablePdf`].

use crate::error::{InputProblem, ProcessingError};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Files above this size are processed but logged.
pub const LARGE_FILE_BYTES: u64 = 100 * 1024 * 1024;

/// Validate a local PDF path. Returns the file size in bytes.
pub fn validate_pdf(path: &Path) -> Result<u64, ProcessingError> {
    let invalid = |problem| ProcessingError::InvalidInput {
        path: path.to_path_buf(),
        problem,
    };

    let meta = std::fs::metadata(path).map_err(|_| invalid(InputProblem::FileNotFound))?;
    if !meta.is_file() {
        return Err(invalid(InputProblem::NotAFile));
    }

    let size = meta.len();
    if size == 0 {
        return Err(invalid(InputProblem::EmptyFile));
    }
    if size > LARGE_FILE_BYTES {
        warn!(
            "Large input file: {:.1} MB ({})",
            size as f64 / 1024.0 / 1024.0,
            path.display()
        );
    }

    if let Ok(mut f) = std::fs::File::open(path) {
        let mut magic = [0u8; 4];
        if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
            warn!(
                "{} does not start with %PDF (found {:?}); page counting may fail",
                path.display(),
                magic
            );
        }
    }

    debug!("Validated input {} ({} bytes)", path.display(), size);
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_pdf(&dir.path().join("nope.pdf")).unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::InvalidInput {
                problem: InputProblem::FileNotFound,
                ..
            }
        ));
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_pdf(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a file"), "got: {err}");
    }

    #[test]
    fn empty_file_is_rejected() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let err = validate_pdf(f.path()).unwrap_err();
        assert!(err.to_string().contains("empty file"), "got: {err}");
    }

    #[test]
    fn non_empty_file_passes_and_reports_size() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n%%EOF\n").unwrap();
        assert_eq!(validate_pdf(f.path()).unwrap(), 15);
    }
}
