//! Expression tree and pattern node types
//!
//! The predicate tree is a plain sum type evaluated by pure recursive
//! functions in `eval`; there is no visitor hierarchy.

use std::fmt;

/// One segment of a dotted name pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// `*`: exactly one segment, any content
    Any,
    /// `..`: zero or more segments
    DeepAny,
    /// literal text, possibly containing `*` wildcards
    Glob(String),
}

impl Segment {
    pub fn from_word(word: &str) -> Self {
        if word == "*" {
            Segment::Any
        } else {
            Segment::Glob(word.to_string())
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Any => write!(f, "*"),
            Segment::DeepAny => write!(f, ".."),
            Segment::Glob(text) => write!(f, "{text}"),
        }
    }
}

/// A dotted type pattern with exact array dimensionality.
/// An empty segment list matches every type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypePattern {
    pub segments: Vec<Segment>,
    pub dims: usize,
}

impl TypePattern {
    pub fn any() -> Self {
        Self { segments: vec![Segment::Any], dims: 0 }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.dims == 0 && (self.segments.is_empty() || self.segments == [Segment::Any])
    }
}

impl fmt::Display for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first && !matches!(segment, Segment::DeepAny) {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
            first = matches!(segment, Segment::DeepAny);
        }
        for _ in 0..self.dims {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

/// One entry of a parameter-list pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamEntry {
    Type(TypePattern),
    /// `..`, absorbing zero or more contiguous parameters; at most one per list
    Ellipsis,
}

/// Required / forbidden modifier bits (`public`, `!static`, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifierPattern {
    pub required: u16,
    pub forbidden: u16,
}

impl ModifierPattern {
    pub fn is_unconstrained(&self) -> bool {
        self.required == 0 && self.forbidden == 0
    }
}

/// Method (or constructor) pattern: `[modifiers] [@Ann..] [ret] decl.name(params)`.
/// A missing return type is only legal for constructor patterns (name `new`).
#[derive(Debug, Clone, PartialEq)]
pub struct MethodPattern {
    pub modifiers: ModifierPattern,
    pub annotations: Vec<String>,
    pub return_type: Option<TypePattern>,
    pub declaring_type: TypePattern,
    pub name: Segment,
    pub parameters: Vec<ParamEntry>,
}

/// Field pattern: `[modifiers] [@Ann..] type decl.name`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPattern {
    pub modifiers: ModifierPattern,
    pub annotations: Vec<String>,
    pub field_type: TypePattern,
    pub declaring_type: TypePattern,
    pub name: Segment,
}

/// The predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionNode {
    And(Box<ExpressionNode>, Box<ExpressionNode>),
    Or(Box<ExpressionNode>, Box<ExpressionNode>),
    Not(Box<ExpressionNode>),
    Call(MethodPattern),
    Execution(MethodPattern),
    Get(FieldPattern),
    Set(FieldPattern),
    Handler(TypePattern),
    Within(TypePattern),
    WithinCode(MethodPattern),
    Cflow(Box<ExpressionNode>),
    CflowBelow(Box<ExpressionNode>),
    /// Reference to a named pointcut, optionally namespace-qualified.
    Reference(String),
    /// Always-true leaf; produced only by derived-tree construction.
    True,
}

impl ExpressionNode {
    /// Does this subtree contain a member-level structural constraint?
    /// Used to decide whether negation can be evaluated at class level.
    pub fn has_member_constraint(&self) -> bool {
        match self {
            ExpressionNode::And(a, b) | ExpressionNode::Or(a, b) => {
                a.has_member_constraint() || b.has_member_constraint()
            }
            ExpressionNode::Not(inner) => inner.has_member_constraint(),
            ExpressionNode::Call(_)
            | ExpressionNode::Execution(_)
            | ExpressionNode::Get(_)
            | ExpressionNode::Set(_)
            | ExpressionNode::Handler(_)
            | ExpressionNode::WithinCode(_)
            | ExpressionNode::Reference(_) => true,
            ExpressionNode::Cflow(_) | ExpressionNode::CflowBelow(_) => false,
            ExpressionNode::Within(_) | ExpressionNode::True => false,
        }
    }
}
