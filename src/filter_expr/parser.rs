//! nom parser for filter expressions.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt, recognize},
    multi::separated_list0,
    sequence::{delimited, preceded},
};

use super::ast::{
    FilterExpr, FilterFnCall, FilterLiteral, FilterOpApplication, FilterOperator, InstanceAccess,
    InstanceRef,
};
use super::errors::FilterParseError;

/// Parses a complete filter expression, requiring all input to be consumed.
pub fn parse_filter(input: &str) -> Result<FilterExpr, FilterParseError> {
    match parse_logical_or(input) {
        Ok((remainder, expression)) => {
            if remainder.trim().is_empty() {
                Ok(expression)
            } else {
                Err(FilterParseError::TrailingInput {
                    remainder: remainder.trim().to_string(),
                })
            }
        }
        Err(_) => Err(FilterParseError::Syntax {
            remainder: input.trim().to_string(),
        }),
    }
}

fn ws<'a, O, F>(mut inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    move |input: &'a str| {
        let (input, _) = multispace0(input)?;
        let (input, output) = inner.parse(input)?;
        let (input, _) = multispace0(input)?;
        Ok((input, output))
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize((
        take_while1(is_identifier_start),
        take_while(is_identifier_char),
    ))
    .parse(input)
}

fn parse_logical_or(input: &str) -> IResult<&str, FilterExpr> {
    let (input, lhs) = parse_logical_and(input)?;

    let mut remaining_input = input;
    let mut final_expression = lhs;

    loop {
        let res = preceded(ws(keyword("OR")), parse_logical_and).parse(remaining_input);
        match res {
            Ok((new_input, rhs)) => {
                final_expression = FilterExpr::OperatorApplicationExp(FilterOpApplication {
                    operator: FilterOperator::Or,
                    operands: vec![final_expression, rhs],
                });
                remaining_input = new_input;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining_input, final_expression))
}

fn parse_logical_and(input: &str) -> IResult<&str, FilterExpr> {
    let (input, lhs) = parse_unary(input)?;

    let mut remaining_input = input;
    let mut final_expression = lhs;

    loop {
        let res = preceded(ws(keyword("AND")), parse_unary).parse(remaining_input);
        match res {
            Ok((new_input, rhs)) => {
                final_expression = FilterExpr::OperatorApplicationExp(FilterOpApplication {
                    operator: FilterOperator::And,
                    operands: vec![final_expression, rhs],
                });
                remaining_input = new_input;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining_input, final_expression))
}

/// Matches a keyword without swallowing a longer identifier ("ORder").
fn keyword(word: &'static str) -> impl Fn(&str) -> IResult<&str, &str> {
    move |input: &str| {
        let (rest, matched) = tag_no_case(word).parse(input)?;
        if rest.chars().next().is_some_and(is_identifier_char) {
            Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )))
        } else {
            Ok((rest, matched))
        }
    }
}

fn parse_unary(input: &str) -> IResult<&str, FilterExpr> {
    alt((
        map(preceded(ws(keyword("NOT")), parse_unary), |expr| {
            FilterExpr::OperatorApplicationExp(FilterOpApplication {
                operator: FilterOperator::Not,
                operands: vec![expr],
            })
        }),
        parse_comparison,
    ))
    .parse(input)
}

fn parse_comparison_operator(input: &str) -> IResult<&str, FilterOperator> {
    alt((
        map(tag(">="), |_| FilterOperator::GreaterThanEqual),
        map(tag("<="), |_| FilterOperator::LessThanEqual),
        map(tag("<>"), |_| FilterOperator::NotEqual),
        map(tag("="), |_| FilterOperator::Equal),
        map(tag(">"), |_| FilterOperator::GreaterThan),
        map(tag("<"), |_| FilterOperator::LessThan),
        map(tag("~"), |_| FilterOperator::Match),
    ))
    .parse(input)
}

fn parse_comparison(input: &str) -> IResult<&str, FilterExpr> {
    let (input, lhs) = parse_primary(input)?;
    let (input, rest) = opt((ws(parse_comparison_operator), parse_primary)).parse(input)?;
    match rest {
        Some((operator, rhs)) => Ok((
            input,
            FilterExpr::OperatorApplicationExp(FilterOpApplication {
                operator,
                operands: vec![lhs, rhs],
            }),
        )),
        None => Ok((input, lhs)),
    }
}

fn parse_primary(input: &str) -> IResult<&str, FilterExpr> {
    alt((
        parse_literal,
        parse_access_or_call,
        delimited(ws(char('(')), parse_logical_or, ws(char(')'))),
    ))
    .parse(input)
}

fn parse_literal(input: &str) -> IResult<&str, FilterExpr> {
    alt((
        map(keyword("TRUE"), |_| {
            FilterExpr::Literal(FilterLiteral::Boolean(true))
        }),
        map(keyword("FALSE"), |_| {
            FilterExpr::Literal(FilterLiteral::Boolean(false))
        }),
        map(keyword("NULL"), |_| FilterExpr::Literal(FilterLiteral::Null)),
        parse_string_literal,
        parse_number_literal,
    ))
    .parse(input)
}

fn parse_string_literal(input: &str) -> IResult<&str, FilterExpr> {
    let (input, content) = delimited(char('"'), take_while(|c| c != '"'), char('"')).parse(input)?;
    Ok((
        input,
        FilterExpr::Literal(FilterLiteral::String(content.to_string())),
    ))
}

fn parse_number_literal(input: &str) -> IResult<&str, FilterExpr> {
    let (rest, text) = recognize((
        opt(char('-')),
        take_while1(|c: char| c.is_ascii_digit()),
        opt((char('.'), take_while1(|c: char| c.is_ascii_digit()))),
    ))
    .parse(input)?;
    let literal = if text.contains('.') {
        FilterLiteral::Float(text.parse().map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))
        })?)
    } else {
        FilterLiteral::Integer(text.parse().map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
        })?)
    };
    Ok((rest, FilterExpr::Literal(literal)))
}

/// Dotted access chain: `this.Prop`, `parent.parent.Prop`, `alias.Prop`, or
/// an instance-scoped call `this.IsOfClass("Widget", "Core")`.
fn parse_access_or_call(input: &str) -> IResult<&str, FilterExpr> {
    let (input, segments) = nom::multi::separated_list1(char('.'), parse_identifier).parse(input)?;

    // A trailing '(' makes the last segment a function name.
    let (input, args) = opt(delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), parse_logical_or),
        ws(char(')')),
    ))
    .parse(input)?;

    let (base, rest) = split_base(&segments);

    match args {
        Some(args) => {
            if rest.len() != 1 {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Verify,
                )));
            }
            Ok((
                input,
                FilterExpr::FnCall(FilterFnCall {
                    base,
                    name: rest[0].to_string(),
                    args,
                }),
            ))
        }
        None => {
            if rest.len() != 1 {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Verify,
                )));
            }
            Ok((
                input,
                FilterExpr::Access(InstanceAccess {
                    base,
                    property: rest[0].to_string(),
                }),
            ))
        }
    }
}

fn split_base<'a>(segments: &'a [&'a str]) -> (InstanceRef, &'a [&'a str]) {
    if segments[0].eq_ignore_ascii_case("this") {
        return (InstanceRef::This, &segments[1..]);
    }
    if segments[0].eq_ignore_ascii_case("parent") {
        let depth = segments
            .iter()
            .take_while(|s| s.eq_ignore_ascii_case("parent"))
            .count();
        return (InstanceRef::Ancestor(depth), &segments[depth..]);
    }
    (InstanceRef::Related(segments[0].to_string()), &segments[1..])
}
