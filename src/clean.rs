//! Production cleanup
//!
//! After a production build only data files survive in the mirrored asset tree,
//! and the paths listed in the output root's manifest are deleted.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::sync::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanOptions {
    /// Extensions (without dot) that survive the cleanup.
    pub keep_extensions: Vec<String>,
    /// File in the output root listing paths to delete, one per line.
    pub manifest_name: String,
}

impl Default for CleanOptions {
    fn default() -> Self {
        CleanOptions {
            keep_extensions: vec!["json".to_string()],
            manifest_name: "publicroot".to_string(),
        }
    }
}

impl CleanOptions {
    fn keeps(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.keep_extensions
                    .iter()
                    .any(|keep| keep.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub files: Vec<PathBuf>,
    pub directories: Vec<PathBuf>,
    /// Manifest entries that escaped the output root and were ignored.
    pub rejected: Vec<String>,
}

impl CleanReport {
    pub fn removed(&self) -> usize {
        self.files.len() + self.directories.len()
    }

    fn merge(&mut self, other: CleanReport) {
        self.files.extend(other.files);
        self.directories.extend(other.directories);
        self.rejected.extend(other.rejected);
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Deletes every file under `dir` whose extension is not kept, then every
/// directory left empty. `dir` itself is never removed.
pub fn clean_non_kept_files(dir: &Path, options: &CleanOptions) -> Result<CleanReport, SyncError> {
    let mut report = CleanReport::default();
    if !dir.is_dir() {
        debug!("Nothing to clean at {}", dir.display());
        return Ok(report);
    }

    // Children before parents, so emptied directories are seen after their files.
    for entry in WalkDir::new(dir).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        let path = entry.path();

        if entry.file_type().is_dir() {
            let is_empty = fs::read_dir(path)
                .map_err(|e| io_error(path, e))?
                .next()
                .is_none();
            if is_empty {
                fs::remove_dir(path).map_err(|e| io_error(path, e))?;
                report.directories.push(path.to_path_buf());
            }
        } else if !options.keeps(path) {
            fs::remove_file(path).map_err(|e| io_error(path, e))?;
            report.files.push(path.to_path_buf());
        }
    }

    info!(
        "Cleaned {}: {} files, {} directories",
        dir.display(),
        report.files.len(),
        report.directories.len()
    );
    Ok(report)
}

/// Manifest entries must stay inside the output root.
fn is_contained(entry: &Path) -> bool {
    entry
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Deletes every path listed in `<output_root>/<manifest_name>`, then the
/// manifest itself. A missing manifest is not an error.
pub fn clean_manifest_paths(
    output_root: &Path,
    options: &CleanOptions,
) -> Result<CleanReport, SyncError> {
    let manifest = output_root.join(&options.manifest_name);
    let content = match fs::read_to_string(&manifest) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No manifest at {}", manifest.display());
            return Ok(CleanReport::default());
        }
        Err(e) => return Err(io_error(&manifest, e)),
    };

    let mut report = CleanReport::default();
    for line in content.lines() {
        let line = line.trim_end_matches('\r').trim();
        if line.is_empty() {
            continue;
        }
        let entry = Path::new(line);
        if !is_contained(entry) {
            warn!("Ignoring manifest entry outside the output root: {}", line);
            report.rejected.push(line.to_string());
            continue;
        }

        let target = output_root.join(entry);
        match fs::symlink_metadata(&target) {
            Ok(metadata) if metadata.is_dir() => {
                fs::remove_dir_all(&target).map_err(|e| io_error(&target, e))?;
                report.directories.push(target);
            }
            Ok(_) => {
                fs::remove_file(&target).map_err(|e| io_error(&target, e))?;
                report.files.push(target);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&target, e)),
        }
    }

    fs::remove_file(&manifest).map_err(|e| io_error(&manifest, e))?;
    report.files.push(manifest);
    Ok(report)
}

/// Full production cleanup: `<output_dir>/<watch_dir_name>` keeps only data
/// files, and the manifest under `output_dir` is applied.
pub fn clean_output(
    output_dir: &Path,
    watch_dir_name: &str,
    options: &CleanOptions,
) -> Result<CleanReport, SyncError> {
    let mut report = clean_non_kept_files(&output_dir.join(watch_dir_name), options)?;
    report.merge(clean_manifest_paths(output_dir, options)?);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn test_only_kept_extensions_survive() {
        let root = tempfile::tempdir().unwrap();
        let assets = root.path().join("assets");
        touch(&assets.join("pack.json"));
        touch(&assets.join("scenes/Level.scene"));
        touch(&assets.join("scenes/Level.ts"));
        touch(&assets.join("images/hero.png"));
        touch(&assets.join("data/level.JSON"));

        let report = clean_non_kept_files(&assets, &CleanOptions::default()).unwrap();

        assert!(assets.join("pack.json").exists());
        assert!(assets.join("data/level.JSON").exists());
        assert!(!assets.join("scenes").exists());
        assert!(!assets.join("images").exists());
        assert!(assets.exists());
        assert_eq!(report.files.len(), 3);
        assert_eq!(report.directories.len(), 2);
    }

    #[test]
    fn test_missing_directory_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let report =
            clean_non_kept_files(&root.path().join("absent"), &CleanOptions::default()).unwrap();
        assert_eq!(report.removed(), 0);
    }

    #[test]
    fn test_manifest_paths_are_removed() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path();
        touch(&out.join("index.html"));
        touch(&out.join("favicon.ico"));
        touch(&out.join("fonts/a.woff"));
        touch(&out.join("bundle.js"));
        fs::write(
            out.join("publicroot"),
            "favicon.ico\r\nfonts\r\n\r\nmissing.txt\n../outside\n",
        )
        .unwrap();

        let report = clean_manifest_paths(out, &CleanOptions::default()).unwrap();

        assert!(!out.join("favicon.ico").exists());
        assert!(!out.join("fonts").exists());
        assert!(!out.join("publicroot").exists());
        assert!(out.join("index.html").exists());
        assert!(out.join("bundle.js").exists());
        assert_eq!(report.rejected, vec!["../outside".to_string()]);
    }

    #[test]
    fn test_missing_manifest_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let report = clean_manifest_paths(root.path(), &CleanOptions::default()).unwrap();
        assert_eq!(report, CleanReport::default());
    }

    #[test]
    fn test_clean_output_combines_both_passes() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path();
        touch(&out.join("assets/pack.json"));
        touch(&out.join("assets/hero.png"));
        touch(&out.join("robots.txt"));
        fs::write(out.join("publicroot"), "robots.txt\n").unwrap();

        let report = clean_output(out, "assets", &CleanOptions::default()).unwrap();

        assert!(out.join("assets/pack.json").exists());
        assert!(!out.join("assets/hero.png").exists());
        assert!(!out.join("robots.txt").exists());
        assert_eq!(report.removed(), 3);
    }
}
