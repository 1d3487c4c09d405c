//! Static parameter analysis
//!
//! Finds identifiers a template reads before anything assigns them, without
//! evaluating it. Every `if` branch and every loop body is analyzed in its own
//! copy of the defined-name set, so a name assigned in only one branch is
//! still reported when read after the block.

use crate::parser::ast::*;
use std::collections::{BTreeSet, HashMap};

/// Names bound at the current point of the walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeContext {
    defined: BTreeSet<String>,
}

impl ScopeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defined.contains(name)
    }

    pub fn define(&mut self, name: impl Into<String>) {
        self.defined.insert(name.into());
    }

    /// Context for a nested block; definitions made inside do not leak out.
    pub fn child(&self) -> Self {
        self.clone()
    }
}

/// Collects parameters read while undefined.
#[derive(Debug, Default)]
pub struct ParameterCollector {
    used_undefined: BTreeSet<String>,
    /// Parameters of referenced documents, keyed by the byte offset of the
    /// `<ref>` tag that includes them.
    references: HashMap<usize, BTreeSet<String>>,
}

impl ParameterCollector {
    pub fn new(references: HashMap<usize, BTreeSet<String>>) -> Self {
        Self {
            used_undefined: BTreeSet::new(),
            references,
        }
    }

    pub fn into_parameters(self) -> BTreeSet<String> {
        self.used_undefined
    }

    fn read(&mut self, name: &str, context: &ScopeContext) {
        if !context.is_defined(name) {
            self.used_undefined.insert(name.to_string());
        }
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    pub fn scan_nodes(&mut self, nodes: &[TemplateNode], context: &mut ScopeContext) {
        for node in nodes {
            self.scan_node(node, context);
        }
    }

    fn scan_node(&mut self, node: &TemplateNode, context: &mut ScopeContext) {
        match node {
            TemplateNode::Text(_) | TemplateNode::Config(_) | TemplateNode::Comment(_) => {}

            TemplateNode::Mustache(tag) => self.scan_expr(&tag.expression, context),

            TemplateNode::If(block) => {
                self.scan_expr(&block.condition, context);
                self.scan_nodes(&block.consequent, &mut context.child());
                if let Some(alternate) = &block.alternate {
                    self.scan_nodes(alternate, &mut context.child());
                }
            }

            TemplateNode::Each(block) => {
                self.scan_expr(&block.expression, context);
                let mut body = context.child();
                body.define(block.context.clone());
                if let Some(index) = &block.index {
                    body.define(index.clone());
                }
                self.scan_nodes(&block.body, &mut body);
                if let Some(alternate) = &block.alternate {
                    self.scan_nodes(alternate, &mut context.child());
                }
            }

            TemplateNode::Message(tag) => {
                self.scan_attributes(&tag.attributes, context);
                self.scan_nodes(&tag.children, context);
            }

            TemplateNode::Content(tag) => {
                self.scan_attributes(&tag.attributes, context);
                self.scan_nodes(&tag.children, context);
            }

            TemplateNode::Step(tag) => {
                let mut as_name = None;
                for attribute in &tag.attributes {
                    if attribute.name == "as" {
                        as_name = attribute.value.static_text();
                    }
                }
                self.scan_attributes(&tag.attributes, context);
                self.scan_nodes(&tag.children, context);
                if let Some(name) = as_name {
                    context.define(name);
                }
            }

            TemplateNode::Reference(tag) => {
                self.scan_attributes(&tag.attributes, context);
                let Some(parameters) = self.references.get(&tag.span.start).cloned() else {
                    return;
                };
                for name in parameters {
                    if find_attribute(&tag.attributes, &name).is_none() {
                        self.read(&name, context);
                    }
                }
            }

            TemplateNode::Scoped(block) => self.scan_nodes(&block.children, context),

            TemplateNode::StepResponse(node) => {
                if let Some(name) = &node.as_name {
                    context.define(name.clone());
                }
            }
        }
    }

    fn scan_attributes(&mut self, attributes: &[Attribute], context: &mut ScopeContext) {
        for attribute in attributes {
            if let AttributeValue::Nodes(nodes) = &attribute.value {
                self.scan_nodes(nodes, context);
            }
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub fn scan_expr(&mut self, expr: &Expr, context: &mut ScopeContext) {
        match &expr.kind {
            ExprKind::Literal(_) => {}

            ExprKind::Identifier(name) => self.read(name, context),

            ExprKind::Array(elements) => {
                for element in elements {
                    self.scan_expr(element, context);
                }
            }

            ExprKind::Object(properties) => {
                for property in properties {
                    if let PropertyKey::Computed(key) = &property.key {
                        self.scan_expr(key, context);
                    }
                    self.scan_expr(&property.value, context);
                }
            }

            ExprKind::Member {
                object, property, ..
            } => {
                self.scan_expr(object, context);
                if let MemberProperty::Computed(key) = property {
                    self.scan_expr(key, context);
                }
            }

            ExprKind::Call {
                callee, arguments, ..
            } => {
                self.scan_expr(callee, context);
                for argument in arguments {
                    self.scan_expr(argument, context);
                }
            }

            ExprKind::Unary { argument, .. } => self.scan_expr(argument, context),

            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                self.scan_expr(left, context);
                self.scan_expr(right, context);
            }

            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.scan_expr(test, context);
                self.scan_expr(consequent, context);
                self.scan_expr(alternate, context);
            }

            ExprKind::Assign { op, target, value } => match &target.kind {
                ExprKind::Identifier(name) => {
                    if op.binary().is_some() {
                        self.read(name, context);
                    }
                    self.scan_expr(value, context);
                    context.define(name.clone());
                }
                _ => {
                    self.scan_expr(target, context);
                    self.scan_expr(value, context);
                }
            },

            ExprKind::Update { argument, .. } => self.scan_expr(argument, context),
        }
    }
}

/// Parameters `fragment` reads before assigning them.
pub fn collect_parameters(
    fragment: &Fragment,
    references: HashMap<usize, BTreeSet<String>>,
) -> BTreeSet<String> {
    let mut collector = ParameterCollector::new(references);
    collector.scan_nodes(&fragment.children, &mut ScopeContext::new());
    collector.into_parameters()
}

// =============================================================================
// TESTS
// =============================================================================
