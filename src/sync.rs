//! Synchronization Driver
//!
//! Mirrors the watched tree into the output tree. Per source path it decides
//! between creating a directory, rewriting a script through the
//! [`ScriptTransformer`], copying verbatim, or deleting the mirrored path.
//! All destination writes go through [`WriteLedger::write_if_changed`].

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::error::TransformError;
use crate::transform::{ScriptTransformer, TransformResult};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("{} is outside the watched tree {}", path.display(), watch_dir.display())]
    OutsideWatchDir { path: PathBuf, watch_dir: PathBuf },

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Transform(#[from] TransformError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SyncError + '_ {
    move |source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What happened to one source path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    CreatedDir,
    Transformed,
    Copied,
    /// The transform failed; the original was copied instead.
    FallbackCopied,
    /// The destination already held the computed bytes.
    UpToDate,
    Removed,
    /// Nothing to remove, or the source vanished before it could be mirrored.
    Missing,
    Excluded,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub directories: usize,
    pub transformed: usize,
    pub copied: usize,
    pub fallback_copied: usize,
    pub up_to_date: usize,
    pub failed: usize,
}

impl SyncReport {
    fn record(&mut self, outcome: &Result<SyncOutcome, SyncError>) {
        match outcome {
            Ok(SyncOutcome::CreatedDir) => self.directories += 1,
            Ok(SyncOutcome::Transformed) => self.transformed += 1,
            Ok(SyncOutcome::Copied) => self.copied += 1,
            Ok(SyncOutcome::FallbackCopied) => self.fallback_copied += 1,
            Ok(SyncOutcome::UpToDate) => self.up_to_date += 1,
            Ok(_) => {}
            Err(_) => self.failed += 1,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WRITE LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct LedgerEntry {
    hash: String,
    len: u64,
    modified: Option<SystemTime>,
}

/// Remembers what was last written where, so unchanged output is never rewritten
/// and the destination does not have to be re-read while its metadata is stable.
#[derive(Debug, Default)]
pub struct WriteLedger {
    entries: Mutex<HashMap<PathBuf, LedgerEntry>>,
}

impl WriteLedger {
    pub fn compute_hash(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Writes `bytes` to `dest` unless it already holds them. Returns whether a
    /// write happened.
    pub fn write_if_changed(&self, dest: &Path, bytes: &[u8]) -> Result<bool, SyncError> {
        let hash = Self::compute_hash(bytes);

        let metadata = fs::metadata(dest).ok();
        if let Some(metadata) = &metadata {
            if let Some(entry) = self.entry(dest) {
                if entry.hash == hash
                    && entry.len == metadata.len()
                    && entry.modified == metadata.modified().ok()
                {
                    return Ok(false);
                }
            }
            if metadata.len() == bytes.len() as u64 {
                let existing = fs::read(dest).map_err(io_error(dest))?;
                if existing == bytes {
                    self.remember(dest, hash);
                    return Ok(false);
                }
            }
        }

        fs::write(dest, bytes).map_err(io_error(dest))?;
        self.remember(dest, hash);
        Ok(true)
    }

    /// Drops `path` and everything below it.
    pub fn forget(&self, path: &Path) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|p, _| !p.starts_with(path));
    }

    fn entry(&self, dest: &Path) -> Option<LedgerEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(dest).cloned()
    }

    fn remember(&self, dest: &Path, hash: String) {
        let metadata = fs::metadata(dest).ok();
        let entry = LedgerEntry {
            hash,
            len: metadata.as_ref().map(|m| m.len()).unwrap_or_default(),
            modified: metadata.and_then(|m| m.modified().ok()),
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(dest.to_path_buf(), entry);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNCHRONIZER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct Synchronizer {
    config: SyncConfig,
    transformer: ScriptTransformer,
    ledger: WriteLedger,
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        let transformer = ScriptTransformer::new(config.transform_options());
        Self {
            config,
            transformer,
            ledger: WriteLedger::default(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// `<watch_dir>/a/b.ts` → `<output_dir>/a/b.ts`
    pub fn destination_for(&self, source: &Path) -> Result<PathBuf, SyncError> {
        let relative =
            source
                .strip_prefix(&self.config.watch_dir)
                .map_err(|_| SyncError::OutsideWatchDir {
                    path: source.to_path_buf(),
                    watch_dir: self.config.watch_dir.clone(),
                })?;
        Ok(self.config.output_dir.join(relative))
    }

    /// Mirrors the current state of `source`: existing paths are synced, vanished
    /// ones are removed from the output.
    pub fn handle_path(&self, source: &Path) -> Result<SyncOutcome, SyncError> {
        if source.exists() {
            self.sync_path(source)
        } else {
            self.remove_path(source)
        }
    }

    /// Typed scripts whose output embeds the members of descriptor `path`. Empty
    /// when `path` is not a descriptor.
    pub fn scripts_described_by(&self, path: &Path) -> Vec<PathBuf> {
        let extension = &self.transformer.options().descriptor_extension;
        if path.extension().and_then(|ext| ext.to_str()) != Some(extension.as_str()) {
            return Vec::new();
        }
        let script = path.with_extension("ts");
        if script.is_file()
            && !self.config.is_excluded(&script)
            && self.transformer.should_transform(&script)
        {
            vec![script]
        } else {
            Vec::new()
        }
    }

    /// [`handle_path`](Self::handle_path), then re-syncs the scripts a changed
    /// descriptor feeds into.
    pub fn handle_change(&self, path: &Path) -> Vec<(PathBuf, Result<SyncOutcome, SyncError>)> {
        let mut outcomes = vec![(path.to_path_buf(), self.handle_path(path))];
        for script in self.scripts_described_by(path) {
            let outcome = self.sync_path(&script);
            outcomes.push((script, outcome));
        }
        outcomes
    }

    pub fn sync_path(&self, source: &Path) -> Result<SyncOutcome, SyncError> {
        if self.config.is_excluded(source) {
            return Ok(SyncOutcome::Excluded);
        }
        let dest = self.destination_for(source)?;

        // Follows links, like the initial walk does.
        let metadata = match fs::metadata(source) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SyncOutcome::Missing),
            Err(source_err) => return Err(io_error(source)(source_err)),
        };
        if metadata.is_dir() {
            fs::create_dir_all(&dest).map_err(io_error(&dest))?;
            return Ok(SyncOutcome::CreatedDir);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        let bytes = fs::read(source).map_err(io_error(source))?;
        let mut fallback = false;

        if self.transformer.should_transform(source) {
            match std::str::from_utf8(&bytes) {
                Ok(text) => match self.transformer.transform(source, text) {
                    Ok(TransformResult::Rewritten(output)) => {
                        let written = self.ledger.write_if_changed(&dest, output.as_bytes())?;
                        if written {
                            info!("Transformed {}", source.display());
                            return Ok(SyncOutcome::Transformed);
                        }
                        return Ok(SyncOutcome::UpToDate);
                    }
                    Ok(TransformResult::Unchanged) => {}
                    Err(e) => {
                        warn!("[{}] {}; copying original", e.code(), e);
                        fallback = true;
                    }
                },
                Err(_) => {
                    warn!("{} is not UTF-8; copying original", source.display());
                    fallback = true;
                }
            }
        }

        let written = self.ledger.write_if_changed(&dest, &bytes)?;
        Ok(match (written, fallback) {
            (false, _) => SyncOutcome::UpToDate,
            (true, true) => SyncOutcome::FallbackCopied,
            (true, false) => {
                debug!("Copied {}", source.display());
                SyncOutcome::Copied
            }
        })
    }

    pub fn remove_path(&self, source: &Path) -> Result<SyncOutcome, SyncError> {
        let dest = self.destination_for(source)?;
        let metadata = match fs::symlink_metadata(&dest) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SyncOutcome::Missing),
            Err(e) => return Err(io_error(&dest)(e)),
        };

        if metadata.is_dir() {
            fs::remove_dir_all(&dest).map_err(io_error(&dest))?;
        } else {
            fs::remove_file(&dest).map_err(io_error(&dest))?;
        }
        self.ledger.forget(&dest);
        info!("Removed {}", dest.display());
        Ok(SyncOutcome::Removed)
    }

    /// Mirrors the whole watched tree. Directories are created first, files are
    /// then processed in parallel; a failing file is logged and counted, never
    /// fatal.
    pub fn initial_sync(&self) -> Result<SyncReport, SyncError> {
        let watch_dir = &self.config.watch_dir;
        if !watch_dir.is_dir() {
            return Err(SyncError::Io {
                path: watch_dir.clone(),
                source: std::io::Error::new(ErrorKind::NotFound, "watch_dir is not a directory"),
            });
        }

        let mut directories = Vec::new();
        let mut files = Vec::new();
        let walker = WalkDir::new(watch_dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| !self.config.is_excluded(entry.path()));
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_dir() => directories.push(entry.into_path()),
                Ok(entry) => files.push(entry.into_path()),
                Err(e) => warn!("Skipping unreadable entry: {}", e),
            }
        }

        let mut report = SyncReport::default();
        for dir in &directories {
            let outcome = self.sync_path(dir);
            if let Err(e) = &outcome {
                warn!("{}", e);
            }
            report.record(&outcome);
        }

        let outcomes: Vec<Result<SyncOutcome, SyncError>> =
            files.par_iter().map(|file| self.sync_path(file)).collect();
        for outcome in &outcomes {
            if let Err(e) = outcome {
                warn!("{}", e);
            }
            report.record(outcome);
        }

        info!(
            "Synced {}: {} transformed, {} copied, {} fallback, {} up to date, {} failed",
            watch_dir.display(),
            report.transformed,
            report.copied,
            report.fallback_copied,
            report.up_to_date,
            report.failed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformOptions;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        watch: PathBuf,
        output: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let watch = root.path().join("public").join("assets");
        let output = root.path().join("dist").join("assets");
        fs::create_dir_all(watch.join("scenes")).unwrap();
        Fixture {
            _root: root,
            watch,
            output,
        }
    }

    fn synchronizer(f: &Fixture) -> Synchronizer {
        Synchronizer::new(SyncConfig {
            watch_dir: f.watch.clone(),
            output_dir: f.output.clone(),
            conversion_dir: Some(f.watch.join("scenes")),
            exclude_patterns: vec![".DS_Store".to_string()],
            transform: TransformOptions::default(),
            ..SyncConfig::default()
        })
    }

    #[test]
    fn test_destination_mapping() {
        let f = fixture();
        let sync = synchronizer(&f);
        assert_eq!(
            sync.destination_for(&f.watch.join("scenes/Level.ts")).unwrap(),
            f.output.join("scenes/Level.ts")
        );
        assert!(matches!(
            sync.destination_for(Path::new("/elsewhere/Level.ts")),
            Err(SyncError::OutsideWatchDir { .. })
        ));
    }

    #[test]
    fn test_transforms_eligible_and_copies_the_rest() {
        let f = fixture();
        fs::write(
            f.watch.join("scenes/Level.js"),
            "function create() { this.add.image(0, 0, 'bg'); }\n",
        )
        .unwrap();
        fs::write(f.watch.join("pack.json"), "{}").unwrap();
        fs::write(f.watch.join("helper.js"), "function h() { this.x = 1; }\n").unwrap();

        let sync = synchronizer(&f);
        let report = sync.initial_sync().unwrap();
        assert_eq!(report.transformed, 1);
        assert_eq!(report.copied, 2);
        assert_eq!(report.failed, 0);

        let level = fs::read_to_string(f.output.join("scenes/Level.js")).unwrap();
        assert_eq!(
            level,
            "export function create(scene) { scene.add.image(0, 0, 'bg'); }\n"
        );
        let helper = fs::read_to_string(f.output.join("helper.js")).unwrap();
        assert_eq!(helper, "function h() { this.x = 1; }\n");
    }

    #[test]
    fn test_failed_transform_falls_back_to_copy() {
        let f = fixture();
        let source = f.watch.join("scenes/Broken.ts");
        fs::write(&source, "function broken( {").unwrap();

        let sync = synchronizer(&f);
        assert_eq!(sync.sync_path(&source).unwrap(), SyncOutcome::FallbackCopied);
        assert_eq!(
            fs::read_to_string(f.output.join("scenes/Broken.ts")).unwrap(),
            "function broken( {"
        );
    }

    #[test]
    fn test_identical_output_is_not_rewritten() {
        let f = fixture();
        let source = f.watch.join("scenes/Level.ts");
        fs::write(&source, "function create() { this.x = 1; }\n").unwrap();

        let sync = synchronizer(&f);
        assert_eq!(sync.sync_path(&source).unwrap(), SyncOutcome::Transformed);
        assert_eq!(sync.sync_path(&source).unwrap(), SyncOutcome::UpToDate);

        // A fresh synchronizer has an empty ledger and falls back to comparing bytes.
        let fresh = synchronizer(&f);
        assert_eq!(fresh.sync_path(&source).unwrap(), SyncOutcome::UpToDate);
    }

    #[test]
    fn test_handle_path_removes_vanished_sources() {
        let f = fixture();
        let source = f.watch.join("scenes/Level.js");
        fs::write(&source, "const a = 1;\n").unwrap();

        let sync = synchronizer(&f);
        assert_eq!(sync.handle_path(&source).unwrap(), SyncOutcome::Copied);
        assert!(f.output.join("scenes/Level.js").exists());

        fs::remove_file(&source).unwrap();
        assert_eq!(sync.handle_path(&source).unwrap(), SyncOutcome::Removed);
        assert!(!f.output.join("scenes/Level.js").exists());
        assert_eq!(sync.handle_path(&source).unwrap(), SyncOutcome::Missing);
    }

    #[test]
    fn test_removed_directory_is_removed_recursively() {
        let f = fixture();
        let dir = f.watch.join("scenes/sub");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.png"), [1u8, 2, 3]).unwrap();

        let sync = synchronizer(&f);
        sync.initial_sync().unwrap();
        assert!(f.output.join("scenes/sub/a.png").exists());

        fs::remove_dir_all(&dir).unwrap();
        assert_eq!(sync.handle_path(&dir).unwrap(), SyncOutcome::Removed);
        assert!(!f.output.join("scenes/sub").exists());
    }

    #[test]
    fn test_excluded_paths_are_skipped() {
        let f = fixture();
        let junk = f.watch.join(".DS_Store");
        fs::write(&junk, "x").unwrap();

        let sync = synchronizer(&f);
        assert_eq!(sync.sync_path(&junk).unwrap(), SyncOutcome::Excluded);
        sync.initial_sync().unwrap();
        assert!(!f.output.join(".DS_Store").exists());
    }

    #[test]
    fn test_descriptor_change_refreshes_script_output() {
        let f = fixture();
        let script = f.watch.join("scenes/Level.ts");
        let descriptor = f.watch.join("scenes/Level.scene");
        fs::write(&script, "function create() {}\n").unwrap();
        fs::write(
            &descriptor,
            r#"{ "displayList": [{ "label": "bg", "type": "Image", "scope": "PUBLIC" }] }"#,
        )
        .unwrap();

        let sync = synchronizer(&f);
        sync.initial_sync().unwrap();
        let output = f.output.join("scenes/Level.ts");
        assert!(fs::read_to_string(&output).unwrap().contains("  bg: Phaser.GameObjects.Image;\n"));

        fs::write(
            &descriptor,
            r#"{ "displayList": [{ "label": "sky", "type": "Sprite", "scope": "PUBLIC" }] }"#,
        )
        .unwrap();
        let outcomes = sync.handle_change(&descriptor);

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].0, script);
        assert_eq!(*outcomes[1].1.as_ref().unwrap(), SyncOutcome::Transformed);
        let text = fs::read_to_string(&output).unwrap();
        assert!(text.contains("  sky: Phaser.GameObjects.Sprite;\n"));
        assert!(!text.contains("bg:"));
    }

    #[test]
    fn test_only_typed_siblings_depend_on_descriptors() {
        let f = fixture();
        fs::write(f.watch.join("scenes/Level.js"), "function create() {}\n").unwrap();
        fs::write(f.watch.join("scenes/Other.ts"), "function create() {}\n").unwrap();

        let sync = synchronizer(&f);
        assert!(sync
            .scripts_described_by(&f.watch.join("scenes/Level.scene"))
            .is_empty());
        assert!(sync
            .scripts_described_by(&f.watch.join("scenes/Other.ts"))
            .is_empty());
        assert_eq!(
            sync.scripts_described_by(&f.watch.join("scenes/Other.scene")),
            vec![f.watch.join("scenes/Other.ts")]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_is_mirrored() {
        let f = fixture();
        let shared = f._root.path().join("shared");
        fs::create_dir_all(&shared).unwrap();
        fs::write(shared.join("tiles.json"), "[]").unwrap();
        std::os::unix::fs::symlink(&shared, f.watch.join("shared")).unwrap();

        let sync = synchronizer(&f);
        let report = sync.initial_sync().unwrap();

        assert_eq!(report.failed, 0);
        assert!(f.output.join("shared").is_dir());
        assert_eq!(
            fs::read_to_string(f.output.join("shared/tiles.json")).unwrap(),
            "[]"
        );
    }
}
