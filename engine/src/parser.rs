// Parser for .psl schedule description files.
//
// Parses a token stream (from the lexer) into the AST described in `ast`.
// Uses chumsky combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus diagnostics for every lex and syntax
//                 error (non-fatal).
// Failure modes: syntax errors become `E0001` diagnostics, unrecognized
//                characters `E0002`.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::diag::{codes, Diagnostic};
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse a .psl source string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let mut diagnostics: Vec<Diagnostic> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Diagnostic::error(codes::E0002, Some(span), e.message)
        })
        .collect();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    diagnostics.extend(
        parse_errors
            .into_iter()
            .map(|e| Diagnostic::error(codes::E0001, Some(*e.span()), e.to_string())),
    );

    ParseResult {
        program,
        diagnostics,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let nl = just(Token::Newline).repeated().ignored();

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    let int = select! {
        Token::Int(n) = e => (n, e.span()),
    };

    // ── '[' IDENT (',' IDENT)* ']' ──

    let vars = ident
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

    // ── '[' INT '..' INT (',' ...)* ']' ──

    let range = int
        .clone()
        .then_ignore(just(Token::DotDot))
        .then(int.clone())
        .map_with(|((lo, _), (hi, _)), e| Range {
            lo,
            hi,
            span: e.span(),
        });

    let ranges = range
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

    // ── Access: kind '(' producer (',' arg)* ')' ──

    let access_arg = int
        .clone()
        .then(just(Token::Colon).ignore_then(int.clone()).or_not())
        .map_with(|((lo, _), hi), e| match hi {
            Some((hi, _)) => AccessArg::Offsets(lo, hi, e.span()),
            None => AccessArg::Int(lo, e.span()),
        });

    let access = ident
        .clone()
        .then(
            ident
                .clone()
                .then(
                    just(Token::Comma)
                        .ignore_then(access_arg)
                        .repeated()
                        .collect::<Vec<_>>(),
                )
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map_with(|(kind, (producer, args)), e| Access {
            kind,
            producer,
            args,
            span: e.span(),
        });

    // ── Statements ──

    let input_stmt = just(Token::Input)
        .ignore_then(ident.clone())
        .then(vars.clone())
        .then_ignore(just(Token::Domain))
        .then(ranges.clone())
        .map(|((name, vars), domain)| StatementKind::Input(InputStmt { name, vars, domain }));

    let func_stmt = just(Token::Func)
        .ignore_then(ident.clone())
        .then(vars)
        .then(
            just(Token::Equals)
                .ignore_then(
                    access
                        .separated_by(just(Token::Comma))
                        .at_least(1)
                        .collect::<Vec<_>>(),
                )
                .or_not(),
        )
        .then(just(Token::Domain).ignore_then(ranges.clone()).or_not())
        .map(|(((name, vars), accesses), domain)| {
            StatementKind::Func(FuncStmt {
                name,
                vars,
                accesses: accesses.unwrap_or_default(),
                domain,
            })
        });

    let directive_arg = ident
        .clone()
        .map(DirectiveArg::Ident)
        .or(int.map(|(n, span)| DirectiveArg::Int(n, span)));

    let directive = just(Token::Dot)
        .ignore_then(ident.clone())
        .then(
            directive_arg
                .separated_by(just(Token::Comma))
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map_with(|(name, args), e| Directive {
            name,
            args,
            span: e.span(),
        });

    let schedule_stmt = ident
        .clone()
        .then(directive.repeated().at_least(1).collect::<Vec<_>>())
        .map(|(stage, directives)| StatementKind::Schedule(ScheduleStmt { stage, directives }));

    let realize_stmt = just(Token::Realize)
        .ignore_then(ident)
        .then(ranges)
        .map(|(stage, region)| StatementKind::Realize(RealizeStmt { stage, region }));

    // ── Statement dispatch ──

    let statement = choice((input_stmt, func_stmt, realize_stmt, schedule_stmt)).map_with(
        |kind, e| Statement {
            kind,
            span: e.span(),
        },
    );

    // ── Program ──

    nl.clone()
        .ignore_then(
            statement
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(move |statements, e| Program {
            statements,
            span: e.span(),
        })
}

// ── Tests ──
