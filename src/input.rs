//! Input collaborator: newline-delimited JSON tag exports.
//!
//! Each file under `input.root` (top level only) that matches
//! `input.include_globs` and is non-empty holds one [`LocalTagRecord`] per
//! line. Files are read in sorted path order so runs see records in a
//! deterministic sequence. Lines that fail to parse are logged and skipped;
//! they never stop the run.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::InputConfig;
use crate::models::LocalTagRecord;

/// Records read from the input directory.
#[derive(Debug, Default)]
pub struct InputBatch {
    pub records: Vec<LocalTagRecord>,
    pub files: usize,
    /// Lines that were not valid records.
    pub skipped: usize,
}

/// List the input files under `root`: top level only, matching `globs`,
/// non-empty, sorted.
pub fn list_input_files(root: &Path, globs: &[String]) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("Input root does not exist: {}", root.display());
    }

    let include_set = build_globset(globs)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !include_set.is_match(&name) {
            continue;
        }
        if entry.metadata()?.len() == 0 {
            debug!("skipping empty input file {}", entry.path().display());
            continue;
        }
        files.push(entry.into_path());
    }

    files.sort();
    Ok(files)
}

/// Read every record from the configured input. `root_override` replaces
/// `input.root`; a path to a single file reads just that file.
pub fn read_records(config: &InputConfig, root_override: Option<&Path>) -> Result<InputBatch> {
    let root = root_override.unwrap_or(&config.root);

    let files = if root.is_file() {
        vec![root.to_path_buf()]
    } else {
        list_input_files(root, &config.include_globs)?
    };

    let mut batch = InputBatch::default();
    for path in &files {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        let (records, skipped) = parse_records(&content, path);
        batch.records.extend(records);
        batch.skipped += skipped;
        batch.files += 1;
    }

    Ok(batch)
}

/// Parse newline-delimited records, returning the records and the number of
/// skipped lines. Blank lines are ignored.
pub fn parse_records(content: &str, origin: &Path) -> (Vec<LocalTagRecord>, usize) {
    let mut records = Vec::new();
    let mut skipped = 0;

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<LocalTagRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(
                    "{}:{}: skipping unreadable record: {}",
                    origin.display(),
                    lineno + 1,
                    e
                );
                skipped += 1;
            }
        }
    }

    (records, skipped)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
