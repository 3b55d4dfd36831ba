//! Transformation Driver
//!
//! Decides per file whether a script is rewritten into scene-bound form and runs the
//! pipeline `parse → analyze → mutate → verify`. Everything here is synchronous and
//! holds no shared state, so one `ScriptTransformer` can serve many files from many
//! threads.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use oxc_span::SourceType;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

use crate::descriptor::read_public_members;
use crate::error::{Result, TransformError};
use crate::rewrite::{has_exported_class, rewrite_program, top_level_functions, RewriteConfig};

lazy_static! {
    /// Cheap "may contain a function declaration" check. Always confirmed on the AST.
    static ref FUNCTION_PREFILTER: Regex = Regex::new(r"\bfunction\b").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS & RESULT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    /// Only scripts under this subtree are rewritten. `None` disables rewriting.
    #[serde(alias = "conversionDir")]
    pub conversion_dir: Option<PathBuf>,
    /// Name of the injected execution-context parameter.
    #[serde(alias = "contextParam")]
    pub context_param: String,
    /// Engine type the parameter is annotated with in typed output.
    #[serde(alias = "sceneType")]
    pub scene_type: String,
    #[serde(alias = "descriptorExtension")]
    pub descriptor_extension: String,
    #[serde(alias = "maxDescriptorDepth")]
    pub max_descriptor_depth: usize,
    /// Print the verified tree with oxc_codegen instead of keeping source layout.
    pub reprint: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        TransformOptions {
            conversion_dir: None,
            context_param: "scene".to_string(),
            scene_type: "Phaser.Scene".to_string(),
            descriptor_extension: "scene".to_string(),
            max_descriptor_depth: 48,
            reprint: false,
        }
    }
}

/// The two output dialects. Chosen once per file from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// `.js`: untyped parameter, no type synthesis.
    Plain,
    /// `.ts`: annotated parameter and a trailing `SceneExtensions` type.
    Typed,
}

impl OutputMode {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "js" => Some(OutputMode::Plain),
            "ts" => Some(OutputMode::Typed),
            _ => None,
        }
    }

    pub fn source_type(self) -> SourceType {
        let source_type = SourceType::default().with_module(true);
        match self {
            OutputMode::Plain => source_type,
            OutputMode::Typed => source_type.with_typescript(true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformResult {
    Rewritten(String),
    /// Not eligible; the caller copies the source verbatim.
    Unchanged,
}

impl TransformResult {
    pub fn text(&self) -> Option<&str> {
        match self {
            TransformResult::Rewritten(text) => Some(text),
            TransformResult::Unchanged => None,
        }
    }

    pub fn is_rewritten(&self) -> bool {
        matches!(self, TransformResult::Rewritten(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSFORMER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct ScriptTransformer {
    options: TransformOptions,
}

impl ScriptTransformer {
    pub fn new(options: TransformOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    /// Path-level eligibility: supported extension under the conversion subtree.
    pub fn should_transform(&self, path: &Path) -> bool {
        self.output_mode(path).is_some()
    }

    fn output_mode(&self, path: &Path) -> Option<OutputMode> {
        let mode = OutputMode::from_path(path)?;
        let conversion_dir = self.options.conversion_dir.as_deref()?;
        lies_under(path, conversion_dir).then_some(mode)
    }

    pub fn transform(&self, path: &Path, source: &str) -> Result<TransformResult> {
        let Some(mode) = self.output_mode(path) else {
            return Ok(TransformResult::Unchanged);
        };
        if !FUNCTION_PREFILTER.is_match(source) {
            trace!("{}: no function keyword", path.display());
            return Ok(TransformResult::Unchanged);
        }

        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, source, mode.source_type()).parse();
        if !ret.errors.is_empty() {
            return Err(TransformError::unsupported_syntax(
                path,
                format!("{:?}", ret.errors[0]),
            ));
        }
        let program = ret.program;

        if has_exported_class(&program) {
            debug!("{}: exports a class, left as authored", path.display());
            return Ok(TransformResult::Unchanged);
        }
        if top_level_functions(&program).is_empty() {
            debug!("{}: no top-level function declaration", path.display());
            return Ok(TransformResult::Unchanged);
        }

        let members = match mode {
            OutputMode::Typed => read_public_members(
                path,
                &self.options.descriptor_extension,
                self.options.max_descriptor_depth,
            )?,
            OutputMode::Plain => Vec::new(),
        };

        let config = RewriteConfig {
            mode,
            context_param: &self.options.context_param,
            scene_type: &self.options.scene_type,
        };
        let rewritten = rewrite_program(&program, source, &config, &members)
            .map_err(|message| TransformError::invalid_output(path, message))?;

        let reprinted = self.verify(path, &rewritten, mode)?;
        Ok(TransformResult::Rewritten(reprinted.unwrap_or(rewritten)))
    }

    /// Re-parses the rewritten text; nothing that fails to parse leaves the core.
    /// Returns the oxc_codegen printing when `reprint` is on.
    fn verify(&self, path: &Path, rewritten: &str, mode: OutputMode) -> Result<Option<String>> {
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, rewritten, mode.source_type()).parse();
        if !ret.errors.is_empty() {
            return Err(TransformError::invalid_output(
                path,
                format!("{:?}", ret.errors[0]),
            ));
        }
        if self.options.reprint {
            Ok(Some(Codegen::new().build(&ret.program).code))
        } else {
            Ok(None)
        }
    }
}

/// Whether the components of `dir` appear contiguously among the parent
/// components of `path`.
pub fn lies_under(path: &Path, dir: &Path) -> bool {
    let dir: Vec<Component> = dir
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let mut path: Vec<Component> = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    // The file itself never counts as the directory.
    path.pop();

    if dir.is_empty() || dir.len() > path.len() {
        return false;
    }
    path.windows(dir.len()).any(|window| window == dir.as_slice())
}
