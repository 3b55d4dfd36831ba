//! Instantiation Analyzer
//!
//! Finds locals initialized with `new`, then finds which of them the function
//! publishes onto the scene under the same name (`this.hero = hero` or
//! `scene.hero = hero`). This is a naming heuristic over the syntax tree, not a
//! dataflow proof: the identifier is not checked to still hold the constructed
//! value at the assignment.

use oxc_ast::ast::*;
use oxc_ast_visit::{walk, Visit};
use oxc_span::Span;
use oxc_syntax::operator::AssignmentOperator;
use std::collections::HashMap;
use tracing::warn;

use crate::type_map::ANY_TYPE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantiationRecord {
    pub variable_name: String,
    pub constructed_type_name: String,
    /// Span of the binding identifier, the declaration-site handle.
    pub site: Span,
}

#[derive(Debug, Default)]
pub struct FunctionAnalysis {
    /// Every `name = new T()` declaration, in source order.
    pub records: Vec<InstantiationRecord>,
    /// Published names, in order of first publication.
    pub published: Vec<String>,
}

impl FunctionAnalysis {
    /// Record for `name` used by publication matching. Last declaration wins.
    pub fn lookup(&self, name: &str) -> Option<&InstantiationRecord> {
        self.records.iter().rev().find(|r| r.variable_name == name)
    }

    /// `(name, type)` for every published instantiation, in publication order.
    pub fn published_fields(&self) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        for name in &self.published {
            let Some(record) = self.lookup(name) else {
                continue;
            };
            let conflicting = self
                .records
                .iter()
                .filter(|r| r.variable_name == *name)
                .any(|r| r.constructed_type_name != record.constructed_type_name);
            if conflicting {
                warn!(
                    "'{}' is constructed with different types in one function; using {} (declared at {}..{})",
                    name, record.constructed_type_name, record.site.start, record.site.end
                );
            }
            fields.push((name.clone(), record.constructed_type_name.clone()));
        }
        fields
    }
}

/// Runs both passes over one function's parameters and body.
pub fn analyze_function(func: &Function<'_>, context_param: &str) -> FunctionAnalysis {
    let mut declarations = DeclarationCollector {
        records: Vec::new(),
    };
    declarations.visit_formal_parameters(&func.params);
    if let Some(body) = &func.body {
        declarations.visit_function_body(body);
    }

    let known: HashMap<String, usize> = declarations
        .records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.variable_name.clone(), i))
        .collect();

    let mut publications = PublicationCollector {
        known: &known,
        context_param,
        published: Vec::new(),
    };
    publications.visit_formal_parameters(&func.params);
    if let Some(body) = &func.body {
        publications.visit_function_body(body);
    }

    FunctionAnalysis {
        records: declarations.records,
        published: publications.published,
    }
}

/// `Hero` for `new Hero()`, `Phaser.GameObjects.Image` for
/// `new Phaser.GameObjects.Image()`. Other callee shapes are untyped.
pub fn constructed_type_name(callee: &Expression<'_>) -> Option<String> {
    match callee {
        Expression::Identifier(ident) => Some(ident.name.to_string()),
        Expression::StaticMemberExpression(member) => {
            let object = constructed_type_name(&member.object)?;
            Some(format!("{}.{}", object, member.property.name))
        }
        Expression::ParenthesizedExpression(paren) => constructed_type_name(&paren.expression),
        _ => None,
    }
}

/// `this` before the rewrite, the injected parameter after it.
pub fn is_context_receiver(object: &Expression<'_>, context_param: &str) -> bool {
    match object {
        Expression::ThisExpression(_) => true,
        Expression::Identifier(ident) => ident.name == context_param,
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASS 1: DECLARATIONS
// ═══════════════════════════════════════════════════════════════════════════════

struct DeclarationCollector {
    records: Vec<InstantiationRecord>,
}

impl<'a> Visit<'a> for DeclarationCollector {
    fn visit_variable_declarator(&mut self, decl: &VariableDeclarator<'a>) {
        if let (BindingPattern::BindingIdentifier(id), Some(Expression::NewExpression(new_expr))) =
            (&decl.id, &decl.init)
        {
            let type_name =
                constructed_type_name(&new_expr.callee).unwrap_or_else(|| ANY_TYPE.to_string());
            self.records.push(InstantiationRecord {
                variable_name: id.name.to_string(),
                constructed_type_name: type_name,
                site: id.span,
            });
        }
        walk::walk_variable_declarator(self, decl);
    }

    // `this` inside a class body is the instance, not the scene
    fn visit_class(&mut self, _class: &Class<'a>) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASS 2: PUBLICATIONS
// ═══════════════════════════════════════════════════════════════════════════════

struct PublicationCollector<'k> {
    known: &'k HashMap<String, usize>,
    context_param: &'k str,
    published: Vec<String>,
}

impl<'a, 'k> Visit<'a> for PublicationCollector<'k> {
    fn visit_assignment_expression(&mut self, expr: &AssignmentExpression<'a>) {
        if expr.operator == AssignmentOperator::Assign {
            if let (AssignmentTarget::StaticMemberExpression(member), Expression::Identifier(value)) =
                (&expr.left, &expr.right)
            {
                let name = value.name.to_string();
                if is_context_receiver(&member.object, self.context_param)
                    && member.property.name == value.name
                    && self.known.contains_key(&name)
                    && !self.published.contains(&name)
                {
                    self.published.push(name);
                }
            }
        }
        walk::walk_assignment_expression(self, expr);
    }

    fn visit_class(&mut self, _class: &Class<'a>) {}
}
