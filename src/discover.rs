//! Source discovery: walk `[ingest] root` and load matching files.
//!
//! Glob matching is case-insensitive because mainframe exports commonly
//! use upper-case extensions (`PAYROLL.CBL`). Paths are stored relative
//! to the root with `/` separators and returned sorted.

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use cobol_lens_core::models::SourceDocument;

use crate::config::IngestConfig;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

pub fn discover(config: &IngestConfig) -> Result<Vec<SourceDocument>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut documents = Vec::new();

    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        documents.push(load_document(path, rel_str)?);
    }

    documents.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(root = %root.display(), files = documents.len(), "discovery complete");

    Ok(documents)
}

/// Read one file. Bytes that are not valid UTF-8 (EBCDIC-to-Latin-1
/// transfers, stray high bytes in comments) are replaced rather than
/// dropping the file.
fn load_document(path: &Path, relative: String) -> Result<SourceDocument> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(file = %relative, "file is not valid UTF-8; replacing invalid bytes");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };
    Ok(SourceDocument::new(relative, content))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(false)
            .build()
            .with_context(|| format!("Invalid glob pattern: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config(root: &Path) -> IngestConfig {
        IngestConfig {
            root: root.to_path_buf(),
            ..IngestConfig::default()
        }
    }

    #[test]
    fn test_discovers_cobol_sources_sorted() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src/copy")).unwrap();
        fs::write(tmp.path().join("src/PAYROLL.CBL"), "       IDENTIFICATION DIVISION.\n").unwrap();
        fs::write(tmp.path().join("src/copy/rates.cpy"), "       01 RATE PIC 9.\n").unwrap();
        fs::write(tmp.path().join("src/README.md"), "# notes\n").unwrap();
        fs::write(tmp.path().join("BATCH.jcl"), "//JOB1 JOB\n").unwrap();

        let docs = discover(&config(tmp.path())).unwrap();
        let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["BATCH.jcl", "src/PAYROLL.CBL", "src/copy/rates.cpy"]);
        assert_eq!(docs[1].line_count, 1);
    }

    #[test]
    fn test_default_and_custom_excludes() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::create_dir_all(tmp.path().join("archive")).unwrap();
        fs::write(tmp.path().join(".git/HOOK.cbl"), "x\n").unwrap();
        fs::write(tmp.path().join("archive/OLD.cbl"), "x\n").unwrap();
        fs::write(tmp.path().join("NEW.cbl"), "x\n").unwrap();

        let mut cfg = config(tmp.path());
        cfg.exclude_globs = vec!["archive/**".to_string()];
        let docs = discover(&cfg).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "NEW.cbl");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("LEGACY.cbl"), b"      * CAF\xc9 TOTALS\n").unwrap();

        let docs = discover(&config(tmp.path())).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.contains("TOTALS"));
    }

    #[test]
    fn test_missing_root_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(discover(&config(&tmp.path().join("nope"))).is_err());
    }
}
