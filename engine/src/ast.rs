// AST node types for .psl schedule description files.
//
// program      := NL* (statement (NL+ statement)*)? NL*
// statement    := input_stmt | func_stmt | schedule_stmt | realize_stmt
// input_stmt   := 'input' IDENT vars 'domain' ranges
// func_stmt    := 'func' IDENT vars ('=' access (',' access)*)? ('domain' ranges)?
// access       := IDENT '(' IDENT (',' access_arg)* ')'
// access_arg   := INT | INT ':' INT
// schedule_stmt:= IDENT ('.' IDENT '(' (directive_arg (',' directive_arg)*)? ')')+
// realize_stmt := 'realize' IDENT ranges
// vars         := '[' IDENT (',' IDENT)* ']'
// ranges       := '[' INT '..' INT (',' INT '..' INT)* ']'
//
// Every node carries a `SimpleSpan` for error reporting in downstream phases.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
    pub span: Span,
}

// ── Statements ──

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Input(InputStmt),
    Func(FuncStmt),
    Schedule(ScheduleStmt),
    Realize(RealizeStmt),
}

/// `input name[x, y] domain [0..64, 0..64]`
#[derive(Debug, Clone, PartialEq)]
pub struct InputStmt {
    pub name: Ident,
    pub vars: Vec<Ident>,
    pub domain: Vec<Range>,
}

/// `func name[x, y] = stencil(p, 1, 0), pointwise(q) domain [..]`
#[derive(Debug, Clone, PartialEq)]
pub struct FuncStmt {
    pub name: Ident,
    pub vars: Vec<Ident>,
    pub accesses: Vec<Access>,
    pub domain: Option<Vec<Range>>,
}

/// One producer read: `kind(producer, args...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub kind: Ident,
    pub producer: Ident,
    pub args: Vec<AccessArg>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessArg {
    /// `r`: a stencil radius.
    Int(i64, Span),
    /// `lo:hi`: a window's inclusive offsets.
    Offsets(i64, i64, Span),
}

impl AccessArg {
    pub fn span(&self) -> Span {
        match self {
            AccessArg::Int(_, s) | AccessArg::Offsets(_, _, s) => *s,
        }
    }
}

/// `stage.directive(args).directive(args)...`
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleStmt {
    pub stage: Ident,
    pub directives: Vec<Directive>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: Ident,
    pub args: Vec<DirectiveArg>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveArg {
    Ident(Ident),
    Int(i64, Span),
}

impl DirectiveArg {
    pub fn span(&self) -> Span {
        match self {
            DirectiveArg::Ident(id) => id.span,
            DirectiveArg::Int(_, s) => *s,
        }
    }
}

/// `realize name [0..4, 0..4]`
#[derive(Debug, Clone, PartialEq)]
pub struct RealizeStmt {
    pub stage: Ident,
    pub region: Vec<Range>,
}

// ── Ranges ──

/// Half-open `lo..hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub lo: i64,
    pub hi: i64,
    pub span: Span,
}

// ── Identifier ──

/// An identifier with its source text and span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
