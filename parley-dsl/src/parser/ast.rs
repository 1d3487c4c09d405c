//! Abstract Syntax Tree types

use crate::lexer::Span;
use parley_core::{Config, MessageRole};
use serde::{Deserialize, Serialize};

// ============================================================================
// TEMPLATE AST
// ============================================================================

/// The root of a parsed template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub children: Vec<TemplateNode>,
    pub span: Span,
}

impl Fragment {
    pub fn new(children: Vec<TemplateNode>, span: Span) -> Self {
        Self { children, span }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Visit every node of the tree, depth first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a TemplateNode)) {
        for node in &self.children {
            node.walk(visit);
        }
    }
}

/// A node of the template tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateNode {
    Text(TextNode),
    Config(ConfigNode),
    Mustache(MustacheTag),
    Comment(CommentNode),
    Message(MessageTag),
    Content(ContentTag),
    Reference(ReferenceTag),
    Step(StepTag),
    If(IfBlock),
    Each(EachBlock),
    /// A block body resumed after a chain step, running inside a scope frame
    /// restored from the previous step.
    Scoped(ScopedBlock),
    /// The point where the response to the previous step is injected.
    StepResponse(StepResponseNode),
}

impl TemplateNode {
    pub fn span(&self) -> Span {
        match self {
            TemplateNode::Text(n) => n.span,
            TemplateNode::Config(n) => n.span,
            TemplateNode::Mustache(n) => n.span,
            TemplateNode::Comment(n) => n.span,
            TemplateNode::Message(n) => n.span,
            TemplateNode::Content(n) => n.span,
            TemplateNode::Reference(n) => n.span,
            TemplateNode::Step(n) => n.span,
            TemplateNode::If(n) => n.span,
            TemplateNode::Each(n) => n.span,
            TemplateNode::Scoped(n) => n.span,
            TemplateNode::StepResponse(n) => n.span,
        }
    }

    /// Visit this node and every descendant, depth first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a TemplateNode)) {
        visit(self);
        let children: Vec<&'a [TemplateNode]> = match self {
            TemplateNode::Message(n) => vec![n.children.as_slice()],
            TemplateNode::Content(n) => vec![n.children.as_slice()],
            TemplateNode::Step(n) => vec![n.children.as_slice()],
            TemplateNode::Scoped(n) => vec![n.children.as_slice()],
            TemplateNode::If(n) => match &n.alternate {
                Some(alternate) => vec![n.consequent.as_slice(), alternate.as_slice()],
                None => vec![n.consequent.as_slice()],
            },
            TemplateNode::Each(n) => match &n.alternate {
                Some(alternate) => vec![n.body.as_slice(), alternate.as_slice()],
                None => vec![n.body.as_slice()],
            },
            _ => Vec::new(),
        };
        for nodes in children {
            for node in nodes {
                node.walk(visit);
            }
        }
    }
}

/// Literal output text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub data: String,
    pub span: Span,
}

/// The leading YAML configuration block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigNode {
    pub value: Config,
    pub span: Span,
}

/// An embedded `{{ expression }}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MustacheTag {
    pub expression: Expr,
    pub span: Span,
}

/// A `/* */` or `<!-- -->` comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentNode {
    pub data: String,
    /// Codes listed after a `parley-ignore` marker in the comment.
    pub ignores: Vec<String>,
    pub span: Span,
}

/// `<system>`, `<user>`, `<assistant>`, `<tool>` or `<message role=...>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTag {
    /// Fixed role, or `None` for the generic `<message>` tag whose role is
    /// read from its `role` attribute at compile time.
    pub role: Option<MessageRole>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<TemplateNode>,
    pub span: Span,
}

/// Kind of a content tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
        }
    }

    pub fn from_tag(name: &str) -> Option<Self> {
        match name {
            "text" => Some(ContentKind::Text),
            "image" => Some(ContentKind::Image),
            _ => None,
        }
    }
}

/// `<text>` or `<image>` inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTag {
    pub kind: ContentKind,
    pub attributes: Vec<Attribute>,
    pub children: Vec<TemplateNode>,
    pub span: Span,
}

/// `<ref prompt="..."/>` cross-document inclusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTag {
    pub attributes: Vec<Attribute>,
    pub span: Span,
}

/// `<step/>` chain suspension point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTag {
    pub attributes: Vec<Attribute>,
    pub children: Vec<TemplateNode>,
    pub span: Span,
}

/// An element attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
    pub span: Span,
}

/// Attribute value: a bare flag or interpolated nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Flag,
    Nodes(Vec<TemplateNode>),
}

impl AttributeValue {
    /// The literal text when the value contains no expressions.
    pub fn static_text(&self) -> Option<String> {
        match self {
            AttributeValue::Flag => None,
            AttributeValue::Nodes(nodes) => {
                let mut text = String::new();
                for node in nodes {
                    match node {
                        TemplateNode::Text(t) => text.push_str(&t.data),
                        _ => return None,
                    }
                }
                Some(text)
            }
        }
    }
}

/// Find an attribute by name.
pub fn find_attribute<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
    attributes.iter().find(|a| a.name == name)
}

/// `{{#if}} ... {{:else}} ... {{/if}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBlock {
    pub condition: Expr,
    pub consequent: Vec<TemplateNode>,
    pub alternate: Option<Vec<TemplateNode>>,
    pub span: Span,
}

/// `{{#each expr as context, index}} ... {{:else}} ... {{/each}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EachBlock {
    pub expression: Expr,
    pub context: String,
    pub index: Option<String>,
    pub body: Vec<TemplateNode>,
    pub alternate: Option<Vec<TemplateNode>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedBlock {
    pub children: Vec<TemplateNode>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponseNode {
    /// Variable the response text is bound to.
    pub as_name: Option<String>,
    pub span: Span,
}

// ============================================================================
// EXPRESSION AST
// ============================================================================

/// An embedded expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Assignments produce no output when interpolated.
    pub fn is_assignment(&self) -> bool {
        matches!(self.kind, ExprKind::Assign { .. })
    }

    /// Whether the expression is a valid assignment or update target: an
    /// identifier, or a member access with no optional link anywhere in its
    /// chain.
    pub fn is_valid_target(&self) -> bool {
        match &self.kind {
            ExprKind::Identifier(_) => true,
            ExprKind::Member {
                optional: false,
                object,
                ..
            } => !object.has_optional_link(),
            _ => false,
        }
    }

    pub(crate) fn has_optional_link(&self) -> bool {
        match &self.kind {
            ExprKind::Member {
                optional, object, ..
            } => *optional || object.has_optional_link(),
            ExprKind::Call {
                optional, callee, ..
            } => *optional || callee.has_optional_link(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(String),
    Array(Vec<Expr>),
    Object(Vec<ObjectProperty>),
    Member {
        object: Box<Expr>,
        property: MemberProperty,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
        optional: bool,
    },
    Unary {
        op: UnaryOp,
        argument: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Update {
        op: UpdateOp,
        prefix: bool,
        argument: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// `.name` or `[expr]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemberProperty {
    Static(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectProperty {
    pub key: PropertyKey,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyKey {
    Static(String),
    Computed(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    Typeof,
    Void,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::Typeof => "typeof",
            UnaryOp::Void => "void",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    In,
    Instanceof,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNotEq => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::In => "in",
            BinaryOp::Instanceof => "instanceof",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

impl LogicalOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
            LogicalOp::Nullish => "??",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Pow,
    Div,
    Rem,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
}

impl AssignOp {
    /// The binary operator a compound assignment applies, `None` for `=`.
    pub fn binary(&self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Pow => Some(BinaryOp::Pow),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Rem => Some(BinaryOp::Rem),
            AssignOp::Shl => Some(BinaryOp::Shl),
            AssignOp::Shr => Some(BinaryOp::Shr),
            AssignOp::UShr => Some(BinaryOp::UShr),
            AssignOp::BitAnd => Some(BinaryOp::BitAnd),
            AssignOp::BitOr => Some(BinaryOp::BitOr),
            AssignOp::BitXor => Some(BinaryOp::BitXor),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

impl UpdateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOp::Increment => "++",
            UpdateOp::Decrement => "--",
        }
    }
}
