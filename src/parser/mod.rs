//! DSL parser using nom.
//!
//! Parses the restricted SQL surface syntax into an untyped [`Stmt`] tree.
//!
//! # Grammar
//!
//! ```text
//! SELECT * | col[, col...] FROM table[, table...] [WHERE expr]
//! INSERT INTO table (col[, col...]) VALUES (expr[, expr...])
//! UPDATE table SET col = expr[, ...] [WHERE expr]
//! DELETE FROM table [WHERE expr]
//! CREATE TABLE table
//! DROP TABLE table
//! ```
//!
//! Expressions are comparisons (`==  !=  <  <=  >  >=`) combined with
//! `AND`/`OR`; operands are column references (`table.column` or bare),
//! literals, and typed bind markers. A bind marker is `$` plus a one-letter
//! kind tag plus an optional `?` nullable suffix (`$s`, `$s?`, `$i`, `$b`,
//! `$f`, `$d`, `$k`). The tag is mandatory; a bare `$` is a syntax error.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, one_of},
    combinator::{cut, map, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::separated_list1,
    sequence::{pair, preceded, tuple},
    IResult,
};

use crate::ast::*;
use crate::error::{CompileError, CompileResult};

/// Parse a complete DSL statement.
pub fn parse(input: &str) -> CompileResult<Stmt> {
    let src = input.trim();
    match parse_stmt(src) {
        Ok((rest, stmt)) => {
            let rest = rest.trim_start();
            if rest.is_empty() {
                Ok(stmt)
            } else {
                Err(CompileError::syntax(
                    src.len() - rest.len(),
                    format!("unexpected trailing content: '{}'", rest),
                ))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let position = src.len() - e.input.len();
            let token: String = e.input.chars().take(12).collect();
            if token.is_empty() {
                Err(CompileError::syntax(position, "unexpected end of input"))
            } else {
                Err(CompileError::syntax(
                    position,
                    format!("unexpected token near '{}'", token),
                ))
            }
        }
        Err(nom::Err::Incomplete(_)) => {
            Err(CompileError::syntax(src.len(), "unexpected end of input"))
        }
    }
}

fn parse_stmt(input: &str) -> IResult<&str, Stmt> {
    preceded(
        multispace0,
        alt((
            parse_select,
            parse_insert,
            parse_update,
            parse_delete,
            parse_create,
            parse_drop,
        )),
    )(input)
}

/// Parse an identifier (table or column name).
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Match a case-insensitive keyword, refusing to split an identifier.
fn keyword<'a>(word: &'static str) -> impl Fn(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        let (rest, ident) = parse_identifier(input)?;
        if ident.eq_ignore_ascii_case(word) {
            Ok((rest, ident))
        } else {
            Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)))
        }
    }
}

fn comma(input: &str) -> IResult<&str, char> {
    preceded(multispace0, char(','))(input)
}

fn parse_column_ref(input: &str) -> IResult<&str, ColumnRef> {
    let (input, first) = parse_identifier(input)?;
    let (input, second) = opt(preceded(char('.'), parse_identifier))(input)?;
    let col = match second {
        Some(column) => ColumnRef::qualified(first, column),
        None => ColumnRef::bare(first),
    };
    Ok((input, col))
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

fn parse_select(input: &str) -> IResult<&str, Stmt> {
    let (input, _) = keyword("SELECT")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, projection) = parse_projection(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = keyword("FROM")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, from) = separated_list1(comma, preceded(multispace0, parse_identifier))(input)?;
    let (input, filter) = parse_where(input)?;

    Ok((
        input,
        Stmt::Select {
            projection,
            from: from.into_iter().map(String::from).collect(),
            filter,
        },
    ))
}

fn parse_projection(input: &str) -> IResult<&str, Projection> {
    alt((
        value(Projection::Star, char('*')),
        map(
            separated_list1(comma, preceded(multispace0, parse_column_ref)),
            Projection::Columns,
        ),
    ))(input)
}

fn parse_where(input: &str) -> IResult<&str, Option<Expr>> {
    opt(preceded(
        tuple((multispace1, keyword("WHERE"), multispace1)),
        cut(parse_expr),
    ))(input)
}

fn parse_insert(input: &str) -> IResult<&str, Stmt> {
    let (input, _) = keyword("INSERT")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = cut(keyword("INTO"))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, table) = parse_identifier(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('(')(input)?;
    let (input, columns) = separated_list1(comma, preceded(multispace0, parse_identifier))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char(')')(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = cut(keyword("VALUES"))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('(')(input)?;
    let (input, values) = separated_list1(comma, preceded(multispace0, parse_expr))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char(')')(input)?;

    Ok((
        input,
        Stmt::Insert {
            table: table.to_string(),
            columns: columns.into_iter().map(String::from).collect(),
            values,
        },
    ))
}

fn parse_update(input: &str) -> IResult<&str, Stmt> {
    let (input, _) = keyword("UPDATE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, table) = parse_identifier(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = cut(keyword("SET"))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, assignments) = separated_list1(comma, preceded(multispace0, parse_assignment))(input)?;
    let (input, filter) = parse_where(input)?;

    Ok((
        input,
        Stmt::Update {
            table: table.to_string(),
            assignments,
            filter,
        },
    ))
}

/// Parse `column = expr`. Assignment uses a single `=`; comparison in
/// expressions uses `==`.
fn parse_assignment(input: &str) -> IResult<&str, (String, Expr)> {
    let (input, column) = parse_identifier(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('=')(input)?;
    // Reject `==` here so a stray comparison reads as a syntax error.
    if input.starts_with('=') {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::Char)));
    }
    let (input, _) = multispace0(input)?;
    let (input, expr) = parse_expr(input)?;
    Ok((input, (column.to_string(), expr)))
}

fn parse_delete(input: &str) -> IResult<&str, Stmt> {
    let (input, _) = keyword("DELETE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = cut(keyword("FROM"))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, table) = parse_identifier(input)?;
    let (input, filter) = parse_where(input)?;

    Ok((
        input,
        Stmt::Delete {
            table: table.to_string(),
            filter,
        },
    ))
}

fn parse_create(input: &str) -> IResult<&str, Stmt> {
    let (input, _) = keyword("CREATE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = cut(keyword("TABLE"))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, table) = parse_identifier(input)?;
    Ok((
        input,
        Stmt::CreateTable {
            table: table.to_string(),
        },
    ))
}

fn parse_drop(input: &str) -> IResult<&str, Stmt> {
    let (input, _) = keyword("DROP")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = cut(keyword("TABLE"))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, table) = parse_identifier(input)?;
    Ok((
        input,
        Stmt::DropTable {
            table: table.to_string(),
        },
    ))
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Parse an expression. Precedence, loosest first: OR, AND, comparison.
pub fn parse_expr(input: &str) -> IResult<&str, Expr> {
    parse_or_expr(input)
}

fn parse_or_expr(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut lhs) = parse_and_expr(input)?;
    while let Ok((rest, _)) =
        tuple((multispace1, keyword("OR"), multispace1))(input)
    {
        let (rest, rhs) = cut(parse_and_expr)(rest)?;
        lhs = Expr::binary(BinOp::Or, lhs, rhs);
        input = rest;
    }
    Ok((input, lhs))
}

fn parse_and_expr(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut lhs) = parse_comparison(input)?;
    while let Ok((rest, _)) =
        tuple((multispace1, keyword("AND"), multispace1))(input)
    {
        let (rest, rhs) = cut(parse_comparison)(rest)?;
        lhs = Expr::binary(BinOp::And, lhs, rhs);
        input = rest;
    }
    Ok((input, lhs))
}

fn parse_comparison(input: &str) -> IResult<&str, Expr> {
    let (input, lhs) = parse_primary(input)?;
    let (input, rest) = opt(pair(
        preceded(multispace0, parse_comparison_op),
        preceded(multispace0, cut(parse_primary)),
    ))(input)?;
    match rest {
        Some((op, rhs)) => Ok((input, Expr::binary(op, lhs, rhs))),
        None => Ok((input, lhs)),
    }
}

fn parse_comparison_op(input: &str) -> IResult<&str, BinOp> {
    alt((
        value(BinOp::Eq, tag("==")),
        value(BinOp::Ne, tag("!=")),
        value(BinOp::Le, tag("<=")),
        value(BinOp::Ge, tag(">=")),
        value(BinOp::Lt, char('<')),
        value(BinOp::Gt, char('>')),
    ))(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            parse_parenthesized,
            parse_bind,
            map(parse_number, Expr::Literal),
            map(parse_text_literal, Expr::Literal),
            parse_word_operand,
        )),
    )(input)
}

fn parse_parenthesized(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('(')(input)?;
    let (input, expr) = cut(parse_expr)(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = cut(char(')'))(input)?;
    Ok((input, expr))
}

/// Parse a typed bind marker. The one-letter tag is mandatory.
fn parse_bind(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('$')(input)?;
    let (input, letter) = cut(one_of("ifsbdk"))(input)?;
    let (input, suffix) = opt(char('?'))(input)?;
    let tag = match letter {
        'i' => BindBase::Integer,
        'f' => BindBase::Real,
        's' => BindBase::Text,
        'b' => BindBase::Boolean,
        'd' => BindBase::Timestamp,
        'k' => BindBase::Key,
        _ => unreachable!("one_of limits the tag letters"),
    };
    Ok((
        input,
        Expr::Bind(BindTag {
            tag,
            nullable: suffix.is_some(),
        }),
    ))
}

/// A bare word is either a boolean literal or a column reference.
fn parse_word_operand(input: &str) -> IResult<&str, Expr> {
    let (rest, col) = parse_column_ref(input)?;
    if col.table.is_none() {
        if col.column.eq_ignore_ascii_case("true") {
            return Ok((rest, Expr::Literal(Literal::Boolean(true))));
        }
        if col.column.eq_ignore_ascii_case("false") {
            return Ok((rest, Expr::Literal(Literal::Boolean(false))));
        }
    }
    Ok((rest, Expr::Column(col)))
}

fn parse_number(input: &str) -> IResult<&str, Literal> {
    let (input, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;
    let literal = if text.contains('.') {
        Literal::Real(text.parse().map_err(|_| {
            nom::Err::Failure(Error::new(input, ErrorKind::Float))
        })?)
    } else {
        Literal::Integer(text.parse().map_err(|_| {
            nom::Err::Failure(Error::new(input, ErrorKind::Digit))
        })?)
    };
    Ok((input, literal))
}

/// Parse a `'...'` text literal; `''` escapes a quote.
fn parse_text_literal(input: &str) -> IResult<&str, Literal> {
    let (mut rest, _) = char('\'')(input)?;
    let mut out = String::new();
    loop {
        match rest.find('\'') {
            Some(i) => {
                out.push_str(&rest[..i]);
                let after = &rest[i + 1..];
                if let Some(stripped) = after.strip_prefix('\'') {
                    out.push('\'');
                    rest = stripped;
                } else {
                    return Ok((after, Literal::Text(out)));
                }
            }
            None => {
                return Err(nom::Err::Failure(Error::new(rest, ErrorKind::Char)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_select_star() {
        let stmt = parse("SELECT * FROM Person").unwrap();
        assert_eq!(
            stmt,
            Stmt::Select {
                projection: Projection::Star,
                from: vec!["Person".into()],
                filter: None,
            }
        );
    }

    #[test]
    fn test_select_columns() {
        let stmt = parse("SELECT id, address FROM Person").unwrap();
        match stmt {
            Stmt::Select { projection, .. } => assert_eq!(
                projection,
                Projection::Columns(vec![ColumnRef::bare("id"), ColumnRef::bare("address")])
            ),
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn test_select_with_typed_bind() {
        let stmt = parse("SELECT * FROM Person WHERE name == $s").unwrap();
        match stmt {
            Stmt::Select { filter: Some(expr), .. } => assert_eq!(
                expr,
                Expr::binary(
                    BinOp::Eq,
                    Expr::Column(ColumnRef::bare("name")),
                    Expr::Bind(BindTag {
                        tag: BindBase::Text,
                        nullable: false
                    }),
                )
            ),
            other => panic!("expected filtered select, got {:?}", other),
        }
    }

    #[test]
    fn test_nullable_bind_suffix() {
        let stmt = parse("SELECT * FROM Person WHERE address == $s?").unwrap();
        match stmt {
            Stmt::Select { filter: Some(Expr::Binary { rhs, .. }), .. } => assert_eq!(
                *rhs,
                Expr::Bind(BindTag {
                    tag: BindBase::Text,
                    nullable: true
                })
            ),
            other => panic!("expected filtered select, got {:?}", other),
        }
    }

    #[test]
    fn test_untyped_bind_is_syntax_error() {
        let err = parse("SELECT * FROM Person WHERE name == $").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }), "{:?}", err);
    }

    #[test]
    fn test_unknown_bind_tag_is_syntax_error() {
        let err = parse("SELECT * FROM Person WHERE name == $z").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }), "{:?}", err);
    }

    #[test]
    fn test_qualified_columns() {
        let stmt = parse("SELECT Person.id, Order.total FROM Person, Order").unwrap();
        match stmt {
            Stmt::Select { projection, from, .. } => {
                assert_eq!(from, vec!["Person".to_string(), "Order".to_string()]);
                assert_eq!(
                    projection,
                    Projection::Columns(vec![
                        ColumnRef::qualified("Person", "id"),
                        ColumnRef::qualified("Order", "total"),
                    ])
                );
            }
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn test_and_or_precedence() {
        let stmt =
            parse("SELECT * FROM Person WHERE age > 18 AND name == $s OR active == true").unwrap();
        match stmt {
            Stmt::Select { filter: Some(Expr::Binary { op, .. }), .. } => {
                assert_eq!(op, BinOp::Or);
            }
            other => panic!("expected filtered select, got {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_expression() {
        let stmt =
            parse("SELECT * FROM Person WHERE age > 18 AND (name == $s OR name == $s)").unwrap();
        match stmt {
            Stmt::Select { filter: Some(Expr::Binary { op, .. }), .. } => {
                assert_eq!(op, BinOp::And);
            }
            other => panic!("expected filtered select, got {:?}", other),
        }
    }

    #[test]
    fn test_insert() {
        let stmt = parse("INSERT INTO Person (name, address) VALUES ($s, $s?)").unwrap();
        assert_eq!(
            stmt,
            Stmt::Insert {
                table: "Person".into(),
                columns: vec!["name".into(), "address".into()],
                values: vec![
                    Expr::Bind(BindTag {
                        tag: BindBase::Text,
                        nullable: false
                    }),
                    Expr::Bind(BindTag {
                        tag: BindBase::Text,
                        nullable: true
                    }),
                ],
            }
        );
    }

    #[test]
    fn test_update() {
        let stmt = parse("UPDATE Person SET address = $s? WHERE id == $k").unwrap();
        match stmt {
            Stmt::Update { table, assignments, filter } => {
                assert_eq!(table, "Person");
                assert_eq!(assignments.len(), 1);
                assert_eq!(assignments[0].0, "address");
                assert!(filter.is_some());
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_delete() {
        let stmt = parse("DELETE FROM Person WHERE name == 'Ada'").unwrap();
        match stmt {
            Stmt::Delete { table, filter } => {
                assert_eq!(table, "Person");
                assert!(filter.is_some());
            }
            other => panic!("expected delete, got {:?}", other),
        }
    }

    #[test]
    fn test_create_and_drop() {
        assert_eq!(
            parse("CREATE TABLE Person").unwrap(),
            Stmt::CreateTable { table: "Person".into() }
        );
        assert_eq!(
            parse("drop table Person").unwrap(),
            Stmt::DropTable { table: "Person".into() }
        );
    }

    #[test]
    fn test_text_literal_escape() {
        let stmt = parse("DELETE FROM Person WHERE name == 'O''Brien'").unwrap();
        match stmt {
            Stmt::Delete { filter: Some(Expr::Binary { rhs, .. }), .. } => {
                assert_eq!(*rhs, Expr::Literal(Literal::Text("O'Brien".into())));
            }
            other => panic!("expected delete, got {:?}", other),
        }
    }

    #[test]
    fn test_trailing_content_is_syntax_error() {
        let err = parse("SELECT * FROM Person garbage here").unwrap_err();
        match err {
            CompileError::Syntax { position, message } => {
                assert!(position > 0);
                assert!(message.contains("trailing"));
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert!(parse("select * from Person where name == $s").is_ok());
    }

    #[test]
    fn test_error_position_points_at_token() {
        let err = parse("SELEC * FROM Person").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }
}
