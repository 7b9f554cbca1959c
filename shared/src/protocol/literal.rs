//! Parser for the producer's native literal syntax
//!
//! Grammar (a strict subset of the producer language's literal syntax,
//! plus the JSON keywords):
//!
//! ```text
//! value := dict | list | tuple | string | number | word
//! dict  := '{' (string ':' value (',' string ':' value)* ','?)? '}'
//! list  := '[' (value (',' value)* ','?)? ']'
//! tuple := '(' (value (',' value)* ','?)? ')'
//! word  := True | False | None | true | false | null | inf | nan
//! ```
//!
//! Tuples become JSON arrays. Bare non-finite floats (`inf`, `-inf`, `nan`)
//! become one-entry objects such as `{"float": "inf"}`, so they stay distinct
//! from the quoted string `'inf'`.

use super::DecodeError;
use crate::types::record::NON_FINITE_KEY;
use serde_json::{Map, Number, Value};

const MAX_DEPTH: usize = 64;

/// Parse one literal into a JSON value tree.
pub fn parse_literal(text: &str) -> Result<Value, DecodeError> {
    let mut parser = Parser { src: text, pos: 0 };
    parser.skip_ws();
    let value = parser.value(0)?;
    parser.skip_ws();
    if parser.pos != parser.src.len() {
        return Err(parser.error("trailing characters after literal"));
    }
    Ok(value)
}

fn non_finite(spelling: &str) -> Value {
    let mut map = Map::new();
    map.insert(NON_FINITE_KEY.to_string(), Value::String(spelling.to_string()));
    Value::Object(map)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> DecodeError {
        DecodeError::Syntax {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), DecodeError> {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", expected)))
        }
    }

    fn value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(self.error("literal nested too deeply"));
        }
        match self.peek() {
            Some('{') => self.dict(depth),
            Some('[') => self.sequence(']', depth),
            Some('(') => self.sequence(')', depth),
            Some('\'') | Some('"') => self.string().map(Value::String),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.word(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn dict(&mut self, depth: usize) -> Result<Value, DecodeError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key_pos = self.pos;
            let key = match self.value(depth + 1)? {
                Value::String(s) => s,
                _ => {
                    return Err(DecodeError::Syntax {
                        offset: key_pos,
                        message: "dict keys must be strings".to_string(),
                    })
                }
            };
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = self.value(depth + 1)?;
            if map.insert(key.clone(), value).is_some() {
                return Err(DecodeError::Syntax {
                    offset: key_pos,
                    message: format!("duplicate key '{}'", key),
                });
            }
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(map)),
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn sequence(&mut self, close: char, depth: usize) -> Result<Value, DecodeError> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.value(depth + 1)?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(Value::Array(items)),
                _ => return Err(self.error(format!("expected ',' or '{}'", close))),
            }
        }
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();
        loop {
            let c = self.bump().ok_or_else(|| DecodeError::Syntax {
                offset: start,
                message: "unterminated string".to_string(),
            })?;
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let escaped = self.bump().ok_or_else(|| self.error("dangling escape"))?;
            match escaped {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' | '\'' | '"' => out.push(escaped),
                'x' => out.push(self.hex_escape(2)?),
                'u' => out.push(self.hex_escape(4)?),
                'U' => out.push(self.hex_escape(8)?),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, DecodeError> {
        let hex = self
            .rest()
            .get(..digits)
            .ok_or_else(|| self.error("truncated escape sequence"))?;
        let code = u32::from_str_radix(hex, 16)
            .map_err(|_| self.error(format!("invalid escape sequence '{}'", hex)))?;
        let c = char::from_u32(code)
            .ok_or_else(|| self.error(format!("invalid code point {:#x}", code)))?;
        self.pos += digits;
        Ok(c)
    }

    fn number(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        let negative = self.peek() == Some('-');
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        if self.rest().starts_with("inf") {
            self.pos += 3;
            return Ok(non_finite(if negative { "-inf" } else { "inf" }));
        }
        if self.rest().starts_with("nan") {
            self.pos += 3;
            return Ok(non_finite("nan"));
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => self.pos += 1,
                '.' => {
                    is_float = true;
                    self.pos += 1;
                }
                'e' | 'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some('-') | Some('+')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }

        let literal: String = self.src[start..self.pos]
            .chars()
            .filter(|&c| c != '_')
            .collect();
        let invalid = || DecodeError::Syntax {
            offset: start,
            message: format!("invalid number '{}'", literal),
        };

        if !is_float {
            if let Ok(v) = literal.parse::<i64>() {
                return Ok(Value::from(v));
            }
            if let Ok(v) = literal.parse::<u64>() {
                return Ok(Value::from(v));
            }
        }
        let v: f64 = literal.parse().map_err(|_| invalid())?;
        match Number::from_f64(v) {
            Some(n) => Ok(Value::Number(n)),
            None if v > 0.0 => Ok(non_finite("inf")),
            None => Ok(non_finite("-inf")),
        }
    }

    fn word(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            self.pos += 1;
        }
        let word = &self.src[start..self.pos];
        match word {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            "inf" | "nan" => Ok(non_finite(word)),
            other => Err(DecodeError::Syntax {
                offset: start,
                message: format!("unexpected identifier '{}'", other),
            }),
        }
    }
}
