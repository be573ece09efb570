//! Minimal expression language for naming foreign values
//!
//! ```text
//! expr    := primary ( "." ident | "->" ident | "[" int "]" )*
//! primary := ident | "(" type ")" address
//! ```
//!
//! `recycler.pools.list`, `(struct pool *)0x7f3a10002000`, and
//! `pool->slices[3]` are all accepted. Member access through a pointer
//! dereferences it, the way the host debugger does.

use crate::core::types::{Address, WalkError, WalkResult};
use std::str::FromStr;

/// Where an expression starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primary {
    Symbol(String),
    Cast { type_name: String, address: Address },
}

/// One postfix step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Field(String),
    Index(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub primary: Primary,
    pub steps: Vec<Step>,
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn take_while<F: Fn(char) -> bool>(&mut self, pred: F) -> &'a str {
        self.skip_ws();
        let rest = self.rest();
        let len = rest.find(|c: char| !pred(c)).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn error(&self, reason: impl Into<String>) -> WalkError {
        WalkError::invalid_expression(self.input, reason)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn ident<'a>(cursor: &mut Cursor<'a>) -> WalkResult<&'a str> {
    let name = cursor.take_while(is_ident_char);
    match name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => Ok(name),
        _ => Err(cursor.error(format!("expected identifier at offset {}", cursor.pos))),
    }
}

/// Parses an expression
pub fn parse_expression(input: &str) -> WalkResult<Expression> {
    let mut cursor = Cursor { input, pos: 0 };

    let primary = if cursor.eat("(") {
        let close = cursor
            .rest()
            .find(')')
            .ok_or_else(|| cursor.error("unterminated cast"))?;
        let type_name = cursor.rest()[..close].trim();
        let type_name = type_name.strip_suffix('*').unwrap_or(type_name).trim();
        if type_name.is_empty() {
            return Err(cursor.error("empty cast type"));
        }
        let type_name = type_name.to_string();
        cursor.pos += close + 1;

        let literal = cursor.take_while(|c| c.is_ascii_alphanumeric() || c == '$');
        let address = Address::from_str(literal)
            .map_err(|_| cursor.error(format!("bad address '{}'", literal)))?;
        Primary::Cast { type_name, address }
    } else {
        Primary::Symbol(ident(&mut cursor)?.to_string())
    };

    let mut steps = Vec::new();
    loop {
        if cursor.eat("->") || cursor.eat(".") {
            steps.push(Step::Field(ident(&mut cursor)?.to_string()));
        } else if cursor.eat("[") {
            let digits = cursor.take_while(|c| c.is_ascii_digit());
            let index = digits
                .parse::<u64>()
                .map_err(|_| cursor.error("expected array index"))?;
            if !cursor.eat("]") {
                return Err(cursor.error("expected ']'"));
            }
            steps.push(Step::Index(index));
        } else {
            cursor.skip_ws();
            if !cursor.rest().is_empty() {
                return Err(cursor.error(format!("unexpected '{}'", cursor.rest())));
            }
            break;
        }
    }

    Ok(Expression { primary, steps })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_with_fields() {
        let expr = parse_expression("recycler.pools.list").unwrap();
        assert_eq!(expr.primary, Primary::Symbol("recycler".to_string()));
        assert_eq!(
            expr.steps,
            vec![
                Step::Field("pools".to_string()),
                Step::Field("list".to_string())
            ]
        );
    }

    #[test]
    fn test_cast_with_arrow_and_index() {
        let expr = parse_expression("(struct SliceArea *) 0x7f00 -> slices[3].next").unwrap();
        assert_eq!(
            expr.primary,
            Primary::Cast {
                type_name: "struct SliceArea".to_string(),
                address: Address::new(0x7f00)
            }
        );
        assert_eq!(
            expr.steps,
            vec![
                Step::Field("slices".to_string()),
                Step::Index(3),
                Step::Field("next".to_string())
            ]
        );
    }

    #[test]
    fn test_namespaced_symbol() {
        let expr = parse_expression("leak_detector_container.list").unwrap();
        assert_eq!(expr.steps.len(), 1);
        let expr = parse_expression("Instance::global").unwrap();
        assert_eq!(expr.primary, Primary::Symbol("Instance::global".to_string()));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("pool.").is_err());
        assert!(parse_expression("pool[x]").is_err());
        assert!(parse_expression("(pool)").is_err());
        assert!(parse_expression("(pool 0x10").is_err());
        assert!(parse_expression("pool + 1").is_err());
    }
}
