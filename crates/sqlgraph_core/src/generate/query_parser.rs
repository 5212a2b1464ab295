//! Splits a raw SQL statement into its named CTE bodies and final select.
//!
//! A node's template may itself carry a `with` chain (custom SQL supplied by
//! the client); the generator flattens those CTEs into the statement it is
//! assembling instead of nesting `with` clauses.

use sqlgraph_error::{Result, SqlGraphError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtesAndSelect {
    /// (name-as-written, body) per CTE, in order.
    pub ctes: Vec<(String, String)>,
    pub select: String,
}

/// Parse `[with name as (..) [, name as (..)]*] select ..`.
///
/// SQL without a leading `with` is returned whole as the final select.
pub fn parse_ctes(sql: &str) -> Result<CtesAndSelect> {
    let trimmed = sql.trim();
    if !starts_with_keyword(trimmed, "with") {
        return Ok(CtesAndSelect {
            ctes: Vec::new(),
            select: trimmed.to_string(),
        });
    }

    let mut rest = trimmed["with".len()..].trim_start();
    let mut ctes = Vec::new();
    loop {
        let (name, after) = parse_identifier(rest)?;
        rest = after.trim_start();

        if !starts_with_keyword(rest, "as") {
            return Err(SqlGraphError::new(format!(
                "expected 'as' after cte name '{name}' in: {sql}"
            )));
        }
        rest = rest["as".len()..].trim_start();

        let (body, after) = take_parenthesized(rest, sql)?;
        ctes.push((name, body.trim().to_string()));
        rest = after.trim_start();

        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma.trim_start();
            continue;
        }
        break;
    }

    if rest.is_empty() {
        return Err(SqlGraphError::new(format!(
            "missing final select after cte list in: {sql}"
        )));
    }
    Ok(CtesAndSelect {
        ctes,
        select: rest.to_string(),
    })
}

fn starts_with_keyword(s: &str, keyword: &str) -> bool {
    if s.len() < keyword.len() || !s[..keyword.len()].eq_ignore_ascii_case(keyword) {
        return false;
    }
    match s.as_bytes().get(keyword.len()) {
        // Word boundary: the keyword must not be a prefix of an identifier.
        Some(b) => !(b.is_ascii_alphanumeric() || *b == b'_'),
        None => true,
    }
}

/// Parse a (possibly quoted) identifier, returned verbatim as written.
fn parse_identifier(s: &str) -> Result<(String, &str)> {
    let bytes = s.as_bytes();
    match bytes.first() {
        Some(b'"') => {
            let mut i = 1;
            while i < bytes.len() {
                if bytes[i] == b'"' {
                    if bytes.get(i + 1) == Some(&b'"') {
                        i += 2;
                        continue;
                    }
                    return Ok((s[..=i].to_string(), &s[i + 1..]));
                }
                i += 1;
            }
            Err(SqlGraphError::new(format!("unterminated quoted identifier: {s}")))
        }
        Some(b'`') => {
            let mut i = 1;
            while i < bytes.len() {
                match bytes[i] {
                    b'\\' => i += 2,
                    b'`' => return Ok((s[..=i].to_string(), &s[i + 1..])),
                    _ => i += 1,
                }
            }
            Err(SqlGraphError::new(format!("unterminated quoted identifier: {s}")))
        }
        Some(b) if b.is_ascii_alphanumeric() || *b == b'_' => {
            let end = bytes
                .iter()
                .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_' || *b == b'$'))
                .unwrap_or(bytes.len());
            Ok((s[..end].to_string(), &s[end..]))
        }
        _ => Err(SqlGraphError::new(format!("expected identifier at: {s}"))),
    }
}

/// Consume a balanced `( .. )` group, skipping string literals and quoted
/// identifiers, returning the inner text and the remainder.
fn take_parenthesized<'a>(s: &'a str, original: &str) -> Result<(&'a str, &'a str)> {
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'(') {
        return Err(SqlGraphError::new(format!(
            "expected '(' after 'as' in: {original}"
        )));
    }
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&s[1..i], &s[i + 1..]));
                }
                i += 1;
            }
            b'\'' => i = skip_quoted(bytes, i, b'\'', true),
            b'"' => i = skip_quoted(bytes, i, b'"', false),
            b'`' => i = skip_quoted(bytes, i, b'`', false),
            _ => i += 1,
        }
    }
    Err(SqlGraphError::new(format!(
        "unbalanced parentheses in: {original}"
    )))
}

/// Skip past a quoted region starting at `start`. Handles doubled-quote
/// escapes and, for string literals, backslash escapes.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if backslash_escapes && bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_select_passes_through() {
        let got = parse_ctes("select 1 as x").unwrap();
        assert!(got.ctes.is_empty());
        assert_eq!("select 1 as x", got.select);
    }

    #[test]
    fn identifier_starting_with_with_is_not_a_cte() {
        let got = parse_ctes("withdrawals").unwrap();
        assert!(got.ctes.is_empty());
        assert_eq!("withdrawals", got.select);
    }

    #[test]
    fn single_cte() {
        let got = parse_ctes("with a as (select 1) select * from a").unwrap();
        assert_eq!(vec![("a".to_string(), "select 1".to_string())], got.ctes);
        assert_eq!("select * from a", got.select);
    }

    #[test]
    fn multiple_ctes_with_nesting() {
        let got = parse_ctes(
            "WITH a AS (select f(1, 2)), b as (select * from a where x in (1, 2)) \
             select * from b",
        )
        .unwrap();
        assert_eq!(2, got.ctes.len());
        assert_eq!(("a".to_string(), "select f(1, 2)".to_string()), got.ctes[0]);
        assert_eq!(
            ("b".to_string(), "select * from a where x in (1, 2)".to_string()),
            got.ctes[1]
        );
        assert_eq!("select * from b", got.select);
    }

    #[test]
    fn quoted_name_and_string_with_paren() {
        let got = parse_ctes(
            "with \"c te\" as (select ')' as p, 'it''s') select * from \"c te\"",
        )
        .unwrap();
        assert_eq!(
            ("\"c te\"".to_string(), "select ')' as p, 'it''s'".to_string()),
            got.ctes[0]
        );
        assert_eq!("select * from \"c te\"", got.select);
    }

    #[test]
    fn missing_as_errors() {
        assert!(parse_ctes("with a (select 1) select 2").is_err());
    }

    #[test]
    fn unbalanced_parens_error() {
        assert!(parse_ctes("with a as (select 1 select 2").is_err());
    }

    #[test]
    fn missing_final_select_errors() {
        assert!(parse_ctes("with a as (select 1)").is_err());
    }
}
