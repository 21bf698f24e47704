// diag.rs — Diagnostics for the .psl front end
//
// Shared diagnostic type used by the parser, elaboration and the driver.
// Engine errors that surface through the front end are wrapped into a
// diagnostic with the span of the statement that caused them, when known.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use chumsky::span::Span as _;
use serde::Serialize;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0001`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code keeps its meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // E00xx: syntax
    pub const E0001: DiagCode = DiagCode("E0001"); // syntax error
    pub const E0002: DiagCode = DiagCode("E0002"); // unexpected character

    // E01xx: pipeline definition
    pub const E0101: DiagCode = DiagCode("E0101"); // unknown stage
    pub const E0102: DiagCode = DiagCode("E0102"); // stage declared twice
    pub const E0103: DiagCode = DiagCode("E0103"); // unknown access kind
    pub const E0104: DiagCode = DiagCode("E0104"); // malformed access arguments
    pub const E0105: DiagCode = DiagCode("E0105"); // producer cycle
    pub const E0106: DiagCode = DiagCode("E0106"); // other graph error (ranks, domains)

    // E02xx: schedule
    pub const E0201: DiagCode = DiagCode("E0201"); // unknown directive
    pub const E0202: DiagCode = DiagCode("E0202"); // malformed directive arguments
    pub const E0203: DiagCode = DiagCode("E0203"); // schedule validation failed

    // E03xx: realize
    pub const E0301: DiagCode = DiagCode("E0301"); // realize request rejected
    pub const E0302: DiagCode = DiagCode("E0302"); // input out of bounds
    pub const E0303: DiagCode = DiagCode("E0303"); // run cancelled

    // W00xx: warnings
    pub const W0001: DiagCode = DiagCode("W0001"); // nothing to realize
    pub const W0002: DiagCode = DiagCode("W0002"); // stage not read by any realize request
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    #[serde(skip)]
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(level: DiagLevel, span: Option<Span>, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
        }
    }

    pub fn error(code: DiagCode, span: Option<Span>, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message).with_code(code)
    }

    pub fn warning(code: DiagCode, span: Option<Span>, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, span, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }

    /// 1-based line and column of the span start in `source`.
    pub fn location(&self, source: &str) -> Option<(usize, usize)> {
        let start = self.span?.start().min(source.len());
        let before = source.get(..start)?;
        let line = before.matches('\n').count() + 1;
        let col = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        Some((line, col))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}
