//! Test discovery: walk the test tree collecting test files by suffix.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::format::{TestCase, TestKind};

/// Discovery filters.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// File suffixes that are tests.
    pub suffixes: Vec<String>,
    /// File or directory names that are never tests.
    pub excludes: BTreeSet<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            suffixes: vec![
                ".pass.cpp".to_string(),
                ".fail.cpp".to_string(),
                ".sh.cpp".to_string(),
            ],
            excludes: BTreeSet::new(),
        }
    }
}

/// Recursively collect test files under `root`, in sorted order. Dot-files
/// and excluded names are skipped, directories are descended into.
pub fn discover_tests(root: &Path, options: &DiscoveryOptions) -> Result<Vec<TestCase>> {
    let mut tests = Vec::new();
    walk(root, root, options, &mut tests)?;
    Ok(tests)
}

fn walk(
    root: &Path,
    dir: &Path,
    options: &DiscoveryOptions,
    tests: &mut Vec<TestCase>,
) -> Result<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .collect();
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with('.') || options.excludes.contains(name) {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, options, tests)?;
            continue;
        }
        if !options.suffixes.iter().any(|suffix| name.ends_with(suffix)) {
            continue;
        }
        let Some(kind) = TestKind::classify(name) else {
            continue;
        };
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        tests.push(TestCase {
            source_path: path,
            relative_path,
            kind,
        });
    }
    Ok(())
}
