//! Output naming and idempotency.
//!
//! One scheme serves both the pre-download skip check and post-download
//! collision resolution: `base.ext`, `base(1).ext`, `base(2).ext`, ...

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::models::DocKind;

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("failed to move {src} to {dest}: {source}")]
    RenameFailure {
        src: String,
        dest: String,
        #[source]
        source: std::io::Error,
    },
}

/// Replace characters that are unsafe in filenames, trimming whitespace.
/// Never returns an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

fn candidate_name(base: &str, ext: &str, n: usize) -> String {
    if n == 0 {
        format!("{base}.{ext}")
    } else {
        format!("{base}({n}).{ext}")
    }
}

/// Whether `name` is `base.ext` or any numbered variant `base(n).ext`.
fn matches_scheme(name: &str, base: &str, ext: &str) -> bool {
    let Some(rest) = name.strip_prefix(base) else {
        return false;
    };
    let Some(middle) = rest.strip_suffix(&format!(".{ext}")) else {
        return false;
    };
    if middle.is_empty() {
        return true;
    }
    middle
        .strip_prefix('(')
        .and_then(|m| m.strip_suffix(')'))
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

/// Pre-download skip check: does any prior output for this task exist?
///
/// The plain `base.ext` wins when present; otherwise the directory is
/// scanned for numbered copies (rather than probing sequentially, so copies
/// left behind after manual deletions are still found). Never mutates state.
pub fn existing_output(dir: &Path, base: &str, ext: &str) -> Option<PathBuf> {
    let plain = dir.join(candidate_name(base, ext, 0));
    if plain.is_file() {
        return Some(plain);
    }

    let entries = fs::read_dir(dir).ok()?;
    let mut hits: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| matches_scheme(name, base, ext))
        })
        .map(|e| e.path())
        .collect();
    hits.sort();
    hits.into_iter().next()
}

/// First free slot in the naming scheme. Probes `base.ext`, then `base(1).ext`,
/// `base(2).ext`, ... without skipping ahead, so gaps left by manual deletion
/// are reused.
pub fn resolve_destination(dir: &Path, base: &str, ext: &str) -> PathBuf {
    let mut n = 0;
    loop {
        let candidate = dir.join(candidate_name(base, ext, n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Move a freshly downloaded file onto its logical name.
///
/// Keeps the downloaded file's own extension when it has one, otherwise
/// infers one from the document kind. Returns the final path.
pub fn finalize(downloaded: &Path, dir: &Path, base: &str, kind: DocKind) -> Result<PathBuf, NamingError> {
    let ext = downloaded
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_string())
        .unwrap_or_else(|| kind.extension().to_string());

    let plain = dir.join(candidate_name(base, &ext, 0));
    if downloaded == plain {
        // Browser already wrote the logical name.
        return Ok(plain);
    }

    let dest = resolve_destination(dir, base, &ext);
    debug!("Renaming {} -> {}", downloaded.display(), dest.display());
    fs::rename(downloaded, &dest).map_err(|e| NamingError::RenameFailure {
        src: downloaded.display().to_string(),
        dest: dest.display().to_string(),
        source: e,
    })?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn sanitize_strips_reserved_characters() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("  report  "), "report");
        assert_eq!(sanitize_filename("///"), "___");
        assert_eq!(sanitize_filename(""), "unnamed");
        assert_eq!(sanitize_filename("  "), "unnamed");
    }

    #[test]
    fn collision_resolution_takes_next_slot() {
        let dir = tempfile::tempdir().unwrap();
        // base.ext .. base(2).ext occupied: next is base(3).ext
        touch(&dir.path().join("report.xlsx"));
        touch(&dir.path().join("report(1).xlsx"));
        touch(&dir.path().join("report(2).xlsx"));
        let dest = resolve_destination(dir.path(), "report", "xlsx");
        assert_eq!(dest, dir.path().join("report(3).xlsx"));
    }

    #[test]
    fn collision_resolution_reuses_gaps() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("report.xlsx"));
        touch(&dir.path().join("report(2).xlsx"));
        // (1) was deleted manually: it is the first free slot
        let dest = resolve_destination(dir.path(), "report", "xlsx");
        assert_eq!(dest, dir.path().join("report(1).xlsx"));
    }

    #[test]
    fn skip_check_finds_plain_and_numbered_outputs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(existing_output(dir.path(), "report", "xlsx").is_none());

        touch(&dir.path().join("report(4).xlsx"));
        // gap before (4), still detected
        assert_eq!(
            existing_output(dir.path(), "report", "xlsx"),
            Some(dir.path().join("report(4).xlsx"))
        );

        touch(&dir.path().join("report.xlsx"));
        assert_eq!(
            existing_output(dir.path(), "report", "xlsx"),
            Some(dir.path().join("report.xlsx"))
        );
    }

    #[test]
    fn skip_check_ignores_lookalikes() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("report2.xlsx"));
        touch(&dir.path().join("report(x).xlsx"));
        touch(&dir.path().join("report.docx"));
        assert!(existing_output(dir.path(), "report", "xlsx").is_none());
    }

    #[test]
    fn finalize_keeps_downloaded_extension() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("export (raw).pdf");
        touch(&src);
        let dest = finalize(&src, dir.path(), "quarterly", DocKind::Doc).unwrap();
        assert_eq!(dest, dir.path().join("quarterly.pdf"));
        assert!(dest.exists());
        assert!(!src.exists());
    }

    #[test]
    fn finalize_infers_extension_from_kind() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("download");
        touch(&src);
        let dest = finalize(&src, dir.path(), "ledger", DocKind::Sheet).unwrap();
        assert_eq!(dest, dir.path().join("ledger.xlsx"));
    }

    #[test]
    fn finalize_resolves_occupied_destination() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("notes.docx"));
        let src = dir.path().join("tmpdownload.docx");
        touch(&src);
        let dest = finalize(&src, dir.path(), "notes", DocKind::Doc).unwrap();
        assert_eq!(dest, dir.path().join("notes(1).docx"));
    }

    #[test]
    fn finalize_is_noop_when_name_already_correct() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("notes.docx");
        touch(&src);
        let dest = finalize(&src, dir.path(), "notes", DocKind::Doc).unwrap();
        assert_eq!(dest, src);
        assert!(src.exists());
    }
}
