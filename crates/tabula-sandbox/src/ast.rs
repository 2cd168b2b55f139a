//! Syntax tree for table scripts.

use tabula_core::Cell;

/// Byte range in the source text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Span {
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

impl Span {
    /// Create a span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// 1-based line and column of a byte offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    /// Line number.
    pub line: usize,
    /// Column number, counted in characters.
    pub column: usize,
}

impl Position {
    /// Locate `offset` within `source`.
    pub fn locate(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let before = source.get(..offset).unwrap_or(source);
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let column = before[line_start..].chars().count() + 1;
        Self { line, column }
    }
}

/// A whole script.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    /// `def` forms in source order.
    pub definitions: Vec<Definition>,
}

/// `(def NAME EXPR)`
#[derive(Clone, Debug, PartialEq)]
pub struct Definition {
    /// Bound name.
    pub name: String,
    /// Bound expression.
    pub value: Expr,
    /// Location of the whole form.
    pub span: Span,
}

/// An expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Number, string, boolean or `nil`.
    Literal {
        /// Literal value.
        value: Cell,
        /// Location.
        span: Span,
    },
    /// Reference to a bound name.
    Ident {
        /// Name.
        name: String,
        /// Location.
        span: Span,
    },
    /// `[a b c]`
    List {
        /// Items.
        items: Vec<Expr>,
        /// Location.
        span: Span,
    },
    /// `(op arg ... :keyword value ...)`
    Call(Box<Call>),
}

impl Expr {
    /// Location of the expression.
    pub fn span(&self) -> Span {
        match self {
            Self::Literal { span, .. } | Self::Ident { span, .. } | Self::List { span, .. } => {
                *span
            }
            Self::Call(call) => call.span,
        }
    }
}

/// Primitive application.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    /// Primitive name as written.
    pub op: String,
    /// Positional arguments.
    pub args: Vec<Expr>,
    /// Keyword arguments in source order.
    pub kwargs: Vec<(String, Expr)>,
    /// Location of the whole form.
    pub span: Span,
}
