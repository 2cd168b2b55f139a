//! Table-script parser.
//!
//! ```text
//! program    := (ws definition)* ws
//! definition := "(" "def" NAME expr ")"
//! expr       := number | string | "true" | "false" | "nil" | NAME | list | call
//! list       := "[" (expr ","?)* "]"
//! call       := "(" OP (expr | ":" NAME expr)* ")"
//! ws         := (whitespace | ";" comment-to-end-of-line)*
//! ```
//!
//! Every node records its byte span so evaluation errors can point back at
//! the source.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace1, none_of},
    combinator::{cut, map, opt, recognize, value, verify},
    error::{ContextError, ParseError as NomParseError, VerboseError, VerboseErrorKind, context},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
};
use tabula_core::Cell;

use crate::ast::{Call, Definition, Expr, Position, Program, Span};
use crate::errors::ParseError;

// ============================================================================
// Public API
// ============================================================================

/// Default nesting limit for calls and lists, the enclosing `def` included.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Parse a complete script with the default nesting limit.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    parse_program_with_depth(source, DEFAULT_MAX_DEPTH)
}

/// Parse a complete script, rejecting brackets nested deeper than `max_depth`.
///
/// The depth check runs on the raw text first so the recursive grammar never
/// sees input deep enough to exhaust the stack.
pub fn parse_program_with_depth(source: &str, max_depth: usize) -> Result<Program, ParseError> {
    check_nesting(source, max_depth)?;
    match program::<VerboseError<&str>>(source, source) {
        Ok((_, program)) => Ok(program),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(syntax_error(source, &e)),
        Err(nom::Err::Incomplete(_)) => Err(ParseError {
            message: "incomplete input".into(),
            position: Position::locate(source, source.len()),
        }),
    }
}

fn check_nesting(source: &str, max_depth: usize) -> Result<(), ParseError> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut in_comment = false;
    for (at, c) in source.char_indices() {
        if in_comment {
            in_comment = c != '\n';
            continue;
        }
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ';' => in_comment = true,
            '(' | '[' => {
                depth += 1;
                if depth > max_depth {
                    return Err(ParseError {
                        message: format!(
                            "expressions are nested deeper than the limit of {max_depth} levels"
                        ),
                        position: Position::locate(source, at),
                    });
                }
            }
            ')' | ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

fn syntax_error(source: &str, error: &VerboseError<&str>) -> ParseError {
    let context_entry = error
        .errors
        .iter()
        .find(|(_, kind)| matches!(kind, VerboseErrorKind::Context(_)));
    let Some((at, kind)) = context_entry.or_else(|| error.errors.first()) else {
        return ParseError {
            message: "invalid script".into(),
            position: Position::locate(source, 0),
        };
    };

    let expected = match kind {
        VerboseErrorKind::Context(what) => format!("expected {what}"),
        VerboseErrorKind::Char(c) => format!("expected '{c}'"),
        VerboseErrorKind::Nom(_) => "unexpected input".to_owned(),
    };
    let found = match at.split_whitespace().next() {
        Some(token) => format!("found '{}'", token.chars().take(24).collect::<String>()),
        None => "found end of input".to_owned(),
    };

    ParseError {
        message: format!("{expected}, {found}"),
        position: Position::locate(source, source.len() - at.len()),
    }
}

// ============================================================================
// Program structure
// ============================================================================

fn offset(full_input: &str, rest: &str) -> usize {
    full_input.len() - rest.len()
}

fn program<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    full_input: &'a str,
) -> IResult<&'a str, Program, E> {
    let (mut input, ()) = ws(input)?;
    let mut definitions = Vec::new();
    while !input.is_empty() {
        let (rest, definition) = cut(|i| definition(i, full_input))(input)?;
        let (rest, ()) = ws(rest)?;
        definitions.push(definition);
        input = rest;
    }
    Ok((input, Program { definitions }))
}

fn definition<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    full_input: &'a str,
) -> IResult<&'a str, Definition, E> {
    let start = offset(full_input, input);

    let (input, _) = context("a '(def NAME EXPR)' form", char('('))(input)?;
    let (input, ()) = ws(input)?;
    let (input, _) = context("'def'", verify(identifier, |word: &str| word == "def"))(input)?;
    let (input, ()) = ws(input)?;
    let (input, name) = context("a name after 'def'", identifier)(input)?;
    let (input, ()) = ws(input)?;
    let (input, value) = context("an expression", |i| expr(i, full_input))(input)?;
    let (input, ()) = ws(input)?;
    let (input, _) = context("closing parenthesis", char(')'))(input)?;

    Ok((
        input,
        Definition {
            name: name.to_owned(),
            value,
            span: Span::new(start, offset(full_input, input)),
        },
    ))
}

// ============================================================================
// Whitespace and comments
// ============================================================================

fn comment<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(char(';'), take_while(|c| c != '\n')))(input)
}

fn ws<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, (), E> {
    value((), many0(alt((multispace1, comment))))(input)
}

fn identifier<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_"), tag("-")))),
    ))(input)
}

// ============================================================================
// Expressions
// ============================================================================

fn expr<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    full_input: &'a str,
) -> IResult<&'a str, Expr, E> {
    alt((
        |i| number(i, full_input),
        |i| string(i, full_input),
        |i| list(i, full_input),
        |i| call(i, full_input),
        |i| symbol(i, full_input),
    ))(input)
}

fn number<'a, E: NomParseError<&'a str>>(
    input: &'a str,
    full_input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let start = offset(full_input, input);
    let (rest, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;

    let value = if text.contains('.') {
        text.parse::<f64>().map_or(Cell::Null, Cell::float)
    } else {
        match text.parse::<i64>() {
            Ok(i) => Cell::Int(i),
            // Out of i64 range: keep the magnitude as a float
            Err(_) => text.parse::<f64>().map_or(Cell::Null, Cell::float),
        }
    };

    Ok((
        rest,
        Expr::Literal {
            value,
            span: Span::new(start, offset(full_input, rest)),
        },
    ))
}

fn string<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    full_input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let start = offset(full_input, input);
    let (rest, text) = delimited(
        char('"'),
        map(
            opt(escaped_transform(
                none_of("\"\\"),
                '\\',
                alt((
                    value('\n', char('n')),
                    value('\r', char('r')),
                    value('\t', char('t')),
                    value('\\', char('\\')),
                    value('"', char('"')),
                )),
            )),
            Option::unwrap_or_default,
        ),
        cut(context("closing quote", char('"'))),
    )(input)?;

    Ok((
        rest,
        Expr::Literal {
            value: Cell::Text(text),
            span: Span::new(start, offset(full_input, rest)),
        },
    ))
}

fn symbol<'a, E: NomParseError<&'a str>>(
    input: &'a str,
    full_input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let start = offset(full_input, input);
    let (rest, name) = identifier(input)?;
    let span = Span::new(start, offset(full_input, rest));
    let expr = match name {
        "true" => Expr::Literal {
            value: Cell::Bool(true),
            span,
        },
        "false" => Expr::Literal {
            value: Cell::Bool(false),
            span,
        },
        "nil" => Expr::Literal {
            value: Cell::Null,
            span,
        },
        _ => Expr::Ident {
            name: name.to_owned(),
            span,
        },
    };
    Ok((rest, expr))
}

fn list<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    full_input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let start = offset(full_input, input);
    let (mut input, _) = char('[')(input)?;
    let mut items = Vec::new();

    loop {
        let (rest, ()) = ws(input)?;
        input = rest;
        match expr::<E>(input, full_input) {
            Ok((rest, item)) => {
                items.push(item);
                let (rest, ()) = ws(rest)?;
                // Optional comma separator
                let (rest, _) = opt(char::<&str, E>(','))(rest)?;
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }

    let (input, _) = cut(context("closing bracket", char(']')))(input)?;
    Ok((
        input,
        Expr::List {
            items,
            span: Span::new(start, offset(full_input, input)),
        },
    ))
}

fn operator<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    // Two-character symbols first so "<=" is not read as "<"
    alt((
        tag("<="),
        tag(">="),
        tag("!="),
        tag("+"),
        tag("-"),
        tag("*"),
        tag("/"),
        tag("%"),
        tag("<"),
        tag(">"),
        tag("="),
        identifier,
    ))(input)
}

fn keyword<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    preceded(char(':'), identifier)(input)
}

fn call<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    full_input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let start = offset(full_input, input);
    let (input, _) = char('(')(input)?;
    let (input, ()) = ws(input)?;
    let (mut input, op) = cut(context("an operation name", operator))(input)?;

    let mut args = Vec::new();
    let mut kwargs = Vec::new();
    loop {
        let (rest, ()) = ws(input)?;
        input = rest;

        if let Ok((rest, key)) = keyword::<E>(input) {
            let (rest, ()) = ws(rest)?;
            let (rest, value) = cut(context("a keyword value", |i| expr(i, full_input)))(rest)?;
            kwargs.push((key.to_owned(), value));
            input = rest;
            continue;
        }

        match expr::<E>(input, full_input) {
            Ok((rest, arg)) => {
                args.push(arg);
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }

    let (input, _) = cut(context("closing parenthesis", char(')')))(input)?;
    Ok((
        input,
        Expr::Call(Box::new(Call {
            op: op.to_owned(),
            args,
            kwargs,
            span: Span::new(start, offset(full_input, input)),
        })),
    ))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn first_value(src: &str) -> Expr {
        let program = parse_program(src).unwrap();
        program.definitions.into_iter().next().unwrap().value
    }

    #[test]
    fn parses_definitions_and_comments() {
        let src = "; keep the first rows\n(def a 1)\n(def b \"x\") ; trailing\n";
        let program = parse_program(src).unwrap();
        assert_eq!(program.definitions.len(), 2);
        assert_eq!(program.definitions[0].name, "a");
        assert_eq!(program.definitions[1].span, Span::new(32, 43));
    }

    #[test]
    fn parses_literals() {
        assert_matches!(first_value("(def x -12)"), Expr::Literal { value: Cell::Int(-12), .. });
        assert_matches!(first_value("(def x 2.5)"), Expr::Literal { value: Cell::Float(f), .. } if (f - 2.5).abs() < f64::EPSILON);
        assert_matches!(first_value("(def x nil)"), Expr::Literal { value: Cell::Null, .. });
        assert_matches!(first_value("(def x true)"), Expr::Literal { value: Cell::Bool(true), .. });
        assert_matches!(first_value("(def x \"\")"), Expr::Literal { value: Cell::Text(ref s), .. } if s.is_empty());
        assert_matches!(first_value(r#"(def x "a\"b\n")"#), Expr::Literal { value: Cell::Text(ref s), .. } if s == "a\"b\n");
    }

    #[test]
    fn identifiers_starting_with_keywords_stay_identifiers() {
        assert_matches!(first_value("(def x true_count)"), Expr::Ident { ref name, .. } if name == "true_count");
    }

    #[test]
    fn parses_calls_with_keywords_and_lists() {
        let expr = first_value("(def t (sort df [\"a\", \"b\"] :descending true))");
        let Expr::Call(call) = expr else {
            panic!("expected call");
        };
        assert_eq!(call.op, "sort");
        assert_eq!(call.args.len(), 2);
        assert_matches!(&call.args[1], Expr::List { items, .. } if items.len() == 2);
        assert_eq!(call.kwargs.len(), 1);
        assert_eq!(call.kwargs[0].0, "descending");
    }

    #[test]
    fn parses_symbolic_operators() {
        for op in ["<=", ">=", "!=", "+", "-", "*", "/", "%", "<", ">", "="] {
            let src = format!("(def x ({op} 1 2))");
            let Expr::Call(call) = first_value(&src) else {
                panic!("expected call for {op}");
            };
            assert_eq!(call.op, op);
            assert_eq!(call.args.len(), 2);
        }
    }

    #[test]
    fn negative_literal_after_minus_operator() {
        let Expr::Call(call) = first_value("(def x (- a -5))") else {
            panic!("expected call");
        };
        assert_matches!(call.args[1], Expr::Literal { value: Cell::Int(-5), .. });
    }

    #[test]
    fn missing_parenthesis_reports_position() {
        let err = parse_program("(def a\n  (col df \"x\")").unwrap_err();
        assert!(err.message.contains("closing parenthesis"), "{}", err.message);
        assert_eq!(err.position.line, 2);
    }

    #[test]
    fn top_level_must_be_def() {
        let err = parse_program("(select df \"a\")").unwrap_err();
        assert!(err.message.contains("'def'"), "{}", err.message);
        assert_eq!(err.position, Position { line: 1, column: 2 });
    }

    #[test]
    fn unterminated_string() {
        let err = parse_program("(def a \"abc)").unwrap_err();
        assert!(err.message.contains("closing quote"), "{}", err.message);
    }

    #[test]
    fn deep_nesting_is_rejected_before_parsing() {
        let depth = 5_000;
        let src = format!("(def x {}df{})", "(head ".repeat(depth), ")".repeat(depth));
        let err = parse_program(&src).unwrap_err();
        assert!(err.message.contains("limit of 64 levels"), "{}", err.message);
        assert_eq!(err.position, Position { line: 1, column: 8 + 6 * 63 });
    }

    #[test]
    fn nesting_ignores_brackets_in_strings_and_comments() {
        let src = "; ((((\n(def x (concat-str \"((((\" \"]]\"))";
        assert!(parse_program_with_depth(src, 2).is_ok());
        assert!(parse_program_with_depth("(def x (head (head df)))", 2).is_err());
    }

    #[test]
    fn empty_program() {
        let program = parse_program("  ; nothing\n").unwrap();
        assert!(program.definitions.is_empty());
    }
}
