//! Pointcut expression engine
//!
//! Parses the textual pointcut language into a composable predicate tree and
//! evaluates it against reflective match contexts. Besides the raw match,
//! every expression derives two cheaper class-level predicates: the
//! advised-class filter (can any member of a class possibly match) and the
//! cflow-class filter (must a class install cflow entry/exit bookkeeping).
//!
//! Grammar sketch:
//!
//! ```text
//! expression  := and_expr (('||' | 'OR') and_expr)*
//! and_expr    := unary (('&&' | 'AND') unary)*
//! unary       := ('!' | 'NOT') unary | '(' expression ')' | leaf
//! leaf        := call(mp) | execution(mp) | get(fp) | set(fp)
//!              | handler(tp) | within(tp) | withincode(mp)
//!              | cflow(expression) | cflowbelow(expression)
//!              | reference
//! ```

pub mod ast;
pub mod context;
pub mod eval;
pub mod info;
pub mod lexer;
pub mod namespace;
pub mod parser;
pub mod pattern;

pub use ast::{ExpressionNode, FieldPattern, MethodPattern, ModifierPattern, ParamEntry, Segment, TypePattern};
pub use context::{ExpressionContext, PointcutKind, ReflectiveInfo};
pub use eval::{CflowStack, Evaluator};
pub use info::ExpressionInfo;
pub use namespace::NamespaceRegistry;
pub use parser::parse_expression;
