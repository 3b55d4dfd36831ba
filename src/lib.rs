//! # Scene Sync Native
//!
//! Mirrors an editor asset tree (scene descriptors plus companion scripts) into a
//! build output tree, rewriting scripts of the conversion subtree into scene-bound
//! functions on the way.
//!
//! ## Rewrite Invariants
//!
//! 1. **Context Parameter**: every top-level function declaration receives the
//!    execution context as its first parameter (`scene`), exactly once.
//!
//! 2. **Self-Reference Rebinding**: `this.x`, `this[x]` and `new X(this, ...)` inside
//!    those functions refer to the context parameter instead. Class bodies keep
//!    their own `this`.
//!
//! 3. **Exports**: rewritten functions are exported. Already-exported declarations,
//!    named or default, are left as they are.
//!
//! 4. **SceneExtensions**: typed output ends with `export type SceneExtensions`,
//!    listing published instantiations (`const hero = new Hero(); this.hero = hero;`)
//!    followed by the PUBLIC objects of the sibling `.scene` descriptor. No fields,
//!    no type.
//!
//! 5. **Idempotence**: rewriting rewritten output yields the same bytes.
//!
//! 6. **Containment**: a file that cannot be rewritten safely is reported, never
//!    emitted half-done. The synchronizer copies it verbatim instead.

#[cfg(feature = "napi")]
use napi_derive::napi;

pub mod clean;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod instantiation;
pub mod rewrite;
pub mod sync;
pub mod transform;
pub mod type_map;
pub mod watcher;


pub use config::SyncConfig;
pub use descriptor::{read_public_members, PublicMember};
pub use error::TransformError;
pub use sync::{SyncError, SyncOutcome, Synchronizer};
pub use transform::{OutputMode, ScriptTransformer, TransformOptions, TransformResult};
pub use watcher::SyncWatcher;

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

/// Transforms one script for a bundler plugin. `null` means "copy it verbatim".
#[cfg(feature = "napi")]
#[napi]
pub fn transform_scene_script_native(
    path: String,
    source: String,
    options_json: Option<String>,
) -> napi::Result<Option<String>> {
    let transformer = ScriptTransformer::new(parse_options(options_json)?);
    match transformer.transform(std::path::Path::new(&path), &source) {
        Ok(TransformResult::Rewritten(text)) => Ok(Some(text)),
        Ok(TransformResult::Unchanged) => Ok(None),
        Err(e) => Err(napi::Error::from_reason(format!("[{}] {}", e.code(), e))),
    }
}

#[cfg(feature = "napi")]
#[napi]
pub fn should_transform_native(path: String, options_json: Option<String>) -> napi::Result<bool> {
    let transformer = ScriptTransformer::new(parse_options(options_json)?);
    Ok(transformer.should_transform(std::path::Path::new(&path)))
}

/// Production cleanup of `<output_dir>/<watch_dir_name>` plus the `publicroot`
/// manifest. Returns the number of removed entries.
#[cfg(feature = "napi")]
#[napi]
pub fn clean_output_native(output_dir: String, watch_dir_name: String) -> napi::Result<u32> {
    let options = clean::CleanOptions::default();
    let output_dir = std::path::PathBuf::from(output_dir);
    clean::clean_output(&output_dir, &watch_dir_name, &options)
        .map(|report| report.removed() as u32)
        .map_err(|e| napi::Error::from_reason(format!("Cleanup failed: {}", e)))
}

#[cfg(feature = "napi")]
fn parse_options(options_json: Option<String>) -> napi::Result<TransformOptions> {
    match options_json {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| napi::Error::from_reason(format!("Options parse error: {}", e))),
        None => Ok(TransformOptions::default()),
    }
}
