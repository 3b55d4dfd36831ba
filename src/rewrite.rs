//! Rewrite Engine
//!
//! Turns top-level free functions into scene-bound functions:
//!
//! ```text
//! function setup() { this.x = 1; }
//! ```
//! becomes
//! ```text
//! export function setup(scene: Phaser.Scene | any) { scene.x = 1; }
//! ```
//!
//! Mutations are located on the oxc AST and applied as span replacements in one
//! reverse-ordered pass, so comments and formatting outside the touched nodes
//! survive verbatim. Each mutation checks for its own result first, which makes
//! the whole rewrite idempotent.

use oxc_ast::ast::*;
use oxc_ast_visit::{walk, Visit};
use oxc_span::Span;
use tracing::{debug, warn};

use crate::descriptor::PublicMember;
use crate::instantiation::analyze_function;
use crate::transform::OutputMode;

/// Name of the synthesized structural type.
pub const SCENE_EXTENSIONS: &str = "SceneExtensions";

#[derive(Debug, Clone, Copy)]
pub struct RewriteConfig<'c> {
    pub mode: OutputMode,
    pub context_param: &'c str,
    pub scene_type: &'c str,
}

impl RewriteConfig<'_> {
    fn parameter_text(&self) -> String {
        match self.mode {
            OutputMode::Typed => format!("{}: {} | any", self.context_param, self.scene_type),
            OutputMode::Plain => self.context_param.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub start: u32,
    pub end: u32,
    pub text: String,
}

impl Replacement {
    fn insert(at: u32, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            text: text.into(),
        }
    }

    fn replace(span: Span, text: impl Into<String>) -> Self {
        Self {
            start: span.start,
            end: span.end,
            text: text.into(),
        }
    }
}

/// A top-level function declaration and whether it already sits in an export.
pub struct TopLevelFunction<'p, 'a> {
    pub func: &'p Function<'a>,
    pub exported: bool,
}

/// Rewrite targets in source order. Ambient `declare function` signatures are
/// skipped; a function named in a local `export { .. }` list counts as exported.
pub fn top_level_functions<'p, 'a>(program: &'p Program<'a>) -> Vec<TopLevelFunction<'p, 'a>> {
    let exported_names = local_export_names(program);
    let mut functions = Vec::new();
    for stmt in &program.body {
        match stmt {
            Statement::FunctionDeclaration(func) => functions.push(TopLevelFunction {
                func: &**func,
                exported: func
                    .id
                    .as_ref()
                    .is_some_and(|id| exported_names.contains(&id.name.as_str())),
            }),
            Statement::ExportNamedDeclaration(export) => {
                if let Some(Declaration::FunctionDeclaration(func)) = &export.declaration {
                    functions.push(TopLevelFunction {
                        func: &**func,
                        exported: true,
                    });
                }
            }
            Statement::ExportDefaultDeclaration(export) => {
                if let ExportDefaultDeclarationKind::FunctionDeclaration(func) =
                    &export.declaration
                {
                    functions.push(TopLevelFunction {
                        func: &**func,
                        exported: true,
                    });
                }
            }
            _ => {}
        }
    }
    functions.retain(|target| !target.func.declare);
    functions
}

/// Local names listed in `export { a, b as c }` without a `from` clause.
fn local_export_names<'p>(program: &'p Program<'_>) -> Vec<&'p str> {
    let mut names = Vec::new();
    for stmt in &program.body {
        if let Statement::ExportNamedDeclaration(export) = stmt {
            if export.source.is_some() {
                continue;
            }
            for specifier in &export.specifiers {
                if let ModuleExportName::IdentifierReference(id) = &specifier.local {
                    names.push(id.name.as_str());
                }
            }
        }
    }
    names
}

/// `export class` / `export default class` marks a hand-authored module.
pub fn has_exported_class(program: &Program<'_>) -> bool {
    program.body.iter().any(|stmt| match stmt {
        Statement::ExportNamedDeclaration(export) => {
            matches!(&export.declaration, Some(Declaration::ClassDeclaration(_)))
        }
        Statement::ExportDefaultDeclaration(export) => matches!(
            &export.declaration,
            ExportDefaultDeclarationKind::ClassDeclaration(_)
        ),
        _ => false,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROGRAM REWRITE
// ═══════════════════════════════════════════════════════════════════════════════

/// Rewrites every top-level function of `program` (parsed from `source`) and, in
/// typed mode, replaces the trailing `SceneExtensions` declaration.
pub fn rewrite_program(
    program: &Program<'_>,
    source: &str,
    config: &RewriteConfig<'_>,
    members: &[PublicMember],
) -> Result<String, String> {
    let mut replacements = Vec::new();
    let mut fields = FieldSet::default();

    for target in top_level_functions(program) {
        let func = target.func;
        if !target.exported {
            replacements.push(Replacement::insert(func.span.start, "export "));
        }
        if let Some(replacement) = context_parameter(func, source, config)? {
            replacements.push(replacement);
        }

        let mut binder = SceneBinder {
            context_param: config.context_param,
            replacements: &mut replacements,
        };
        binder.visit_formal_parameters(&func.params);
        if let Some(body) = &func.body {
            binder.visit_function_body(body);
        }

        if config.mode == OutputMode::Typed {
            for (name, type_name) in analyze_function(func, config.context_param).published_fields()
            {
                fields.push(name, type_name);
            }
        }
    }

    let mut removed_alias = false;
    if config.mode == OutputMode::Typed {
        for member in members {
            fields.push(member.label.clone(), member.type_name.clone());
        }
        for span in scene_extensions_spans(program, source) {
            replacements.push(Replacement::replace(span, ""));
            removed_alias = true;
        }
    }

    let mut output = apply_replacements(source, replacements)?;

    if !fields.is_empty() {
        let alias = fields.render();
        output = format!("{}\n\n{}\n", output.trim_end(), alias);
    } else if removed_alias {
        output = format!("{}\n", output.trim_end());
    }

    Ok(output)
}

/// The `scene` parameter insertion for `func`, or `None` when it already exists.
fn context_parameter(
    func: &Function<'_>,
    source: &str,
    config: &RewriteConfig<'_>,
) -> Result<Option<Replacement>, String> {
    let exists = func.params.items.iter().any(|param| {
        matches!(&param.pattern, BindingPattern::BindingIdentifier(id) if id.name == config.context_param)
    });
    if exists {
        return Ok(None);
    }

    let parameter = config.parameter_text();

    // A TypeScript `this` parameter has to stay first.
    if let Some(this_param) = &func.this_param {
        return Ok(Some(Replacement::insert(
            this_param.span.end,
            format!(", {}", parameter),
        )));
    }

    let open = open_paren(source, func.params.span).ok_or_else(|| {
        format!(
            "no parameter list found for function at offset {}",
            func.span.start
        )
    })?;
    let text = if func.params.items.is_empty() && func.params.rest.is_none() {
        parameter
    } else {
        format!("{}, ", parameter)
    };
    Ok(Some(Replacement::insert(open + 1, text)))
}

fn open_paren(source: &str, params: Span) -> Option<u32> {
    let start = params.start as usize;
    let end = (params.end as usize).min(source.len());
    source
        .get(start..end)?
        .find('(')
        .map(|offset| params.start + offset as u32)
}

/// Spans of every top-level `SceneExtensions` alias, trailing `;` included.
fn scene_extensions_spans(program: &Program<'_>, source: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    for stmt in &program.body {
        let span = match stmt {
            Statement::TSTypeAliasDeclaration(alias) if alias.id.name == SCENE_EXTENSIONS => {
                alias.span
            }
            Statement::ExportNamedDeclaration(export) => match &export.declaration {
                Some(Declaration::TSTypeAliasDeclaration(alias))
                    if alias.id.name == SCENE_EXTENSIONS =>
                {
                    export.span
                }
                _ => continue,
            },
            _ => continue,
        };
        let mut end = span.end as usize;
        while source.as_bytes().get(end) == Some(&b';') {
            end += 1;
        }
        spans.push(Span::new(span.start, end as u32));
    }
    spans
}

/// Applies replacements back to front. Overlapping replacements mean two
/// mutations claimed the same node, which is reported instead of guessed at.
pub fn apply_replacements(
    source: &str,
    mut replacements: Vec<Replacement>,
) -> Result<String, String> {
    replacements.sort_by(|a, b| b.start.cmp(&a.start).then(b.end.cmp(&a.end)));

    let mut result = source.to_string();
    let mut limit = source.len();
    for replacement in replacements {
        let (start, end) = (replacement.start as usize, replacement.end as usize);
        if start > end || end > limit {
            return Err(format!(
                "overlapping edit at {}..{} ({:?})",
                start, end, replacement.text
            ));
        }
        if !result.is_char_boundary(start) || !result.is_char_boundary(end) {
            return Err(format!("edit at {}..{} splits a character", start, end));
        }
        result.replace_range(start..end, &replacement.text);
        limit = start;
    }
    Ok(result)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SELF-REFERENCE REBINDING
// ═══════════════════════════════════════════════════════════════════════════════

/// Rebinds `this.x`, `this[x]` and `new X(this, ...)` to the context parameter.
struct SceneBinder<'r> {
    context_param: &'r str,
    replacements: &'r mut Vec<Replacement>,
}

impl SceneBinder<'_> {
    fn rebind(&mut self, span: Span) {
        self.replacements
            .push(Replacement::replace(span, self.context_param));
    }
}

impl<'a, 'r> Visit<'a> for SceneBinder<'r> {
    fn visit_static_member_expression(&mut self, expr: &StaticMemberExpression<'a>) {
        if let Expression::ThisExpression(this) = &expr.object {
            self.rebind(this.span);
        }
        walk::walk_static_member_expression(self, expr);
    }

    fn visit_computed_member_expression(&mut self, expr: &ComputedMemberExpression<'a>) {
        if let Expression::ThisExpression(this) = &expr.object {
            self.rebind(this.span);
        }
        walk::walk_computed_member_expression(self, expr);
    }

    // Only the first argument position.
    fn visit_new_expression(&mut self, expr: &NewExpression<'a>) {
        if let Some(Argument::ThisExpression(this)) = expr.arguments.first() {
            self.rebind(this.span);
        }
        walk::walk_new_expression(self, expr);
    }

    fn visit_class(&mut self, _class: &Class<'a>) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPE SYNTHESIS
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered field list of the synthesized type. First occurrence of a name wins.
#[derive(Debug, Default)]
pub struct FieldSet {
    fields: Vec<(String, String)>,
}

impl FieldSet {
    pub fn push(&mut self, name: String, type_name: String) {
        if let Some((_, existing)) = self.fields.iter().find(|(n, _)| *n == name) {
            if *existing != type_name {
                warn!(
                    "{} field '{}' already typed {}; ignoring {}",
                    SCENE_EXTENSIONS, name, existing, type_name
                );
            } else {
                debug!("{} field '{}' declared twice", SCENE_EXTENSIONS, name);
            }
            return;
        }
        self.fields.push((name, type_name));
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn render(&self) -> String {
        let mut out = format!("export type {} = {{\n", SCENE_EXTENSIONS);
        for (name, type_name) in &self.fields {
            out.push_str("  ");
            out.push_str(&property_key(name));
            out.push_str(": ");
            out.push_str(type_name);
            out.push_str(";\n");
        }
        out.push_str("};");
        out
    }
}

fn property_key(name: &str) -> String {
    if is_valid_identifier(name) {
        name.to_string()
    } else {
        serde_json::to_string(name).unwrap_or_else(|_| format!("\"{}\"", name))
    }
}

fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
