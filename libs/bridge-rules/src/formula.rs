//! Restricted boolean formulas over positional symbols
//!
//! Accepted vocabulary:
//!
//! | meaning | spellings          |
//! |---------|--------------------|
//! | and     | `.` `&&` `AND`     |
//! | or      | `\|` `\|\|` `OR`   |
//! | not     | `/` `!` `NOT`      |
//! | group   | `(` `)`            |
//! | literal | `0` `1`            |
//!
//! Symbols are runs of lowercase letters (`a`, `z`, `aa`, ...). Anything else
//! is rejected at parse time, so nothing but boolean operators ever reaches
//! the expression engine. Precedence is the usual not > and > or.

use crate::error::{EvaluationError, Result};
use crate::symbols::{index_for_symbol, symbol_for_index};
use evalexpr::{build_operator_tree, ContextWithMutableVariables, HashMapContext, Node, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Symbol(usize),
    Literal(bool),
    And,
    Or,
    Not,
    Open,
    Close,
}

impl Token {
    fn render(self, out: &mut String) {
        match self {
            Token::Symbol(index) => out.push_str(&symbol_for_index(index)),
            Token::Literal(true) => out.push_str("true"),
            Token::Literal(false) => out.push_str("false"),
            Token::And => out.push_str("&&"),
            Token::Or => out.push_str("||"),
            Token::Not => out.push('!'),
            Token::Open => out.push('('),
            Token::Close => out.push(')'),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'.' => {
                tokens.push(Token::And);
                i += 1;
            },
            b'&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push(Token::And);
                i += 2;
            },
            b'|' => {
                tokens.push(Token::Or);
                i += if bytes.get(i + 1) == Some(&b'|') { 2 } else { 1 };
            },
            b'/' | b'!' => {
                tokens.push(Token::Not);
                i += 1;
            },
            b'(' => {
                tokens.push(Token::Open);
                i += 1;
            },
            b')' => {
                tokens.push(Token::Close);
                i += 1;
            },
            b'0' | b'1' => {
                if bytes.get(i + 1).is_some_and(u8::is_ascii_alphanumeric) {
                    return Err(EvaluationError::syntax(
                        source,
                        format!("unexpected literal at offset {}", i),
                    ));
                }
                tokens.push(Token::Literal(c == b'1'));
                i += 1;
            },
            b'a'..=b'z' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_lowercase() {
                    i += 1;
                }
                let word = &source[start..i];
                let index = index_for_symbol(word).ok_or_else(|| {
                    EvaluationError::syntax(source, format!("symbol '{}' is out of range", word))
                })?;
                tokens.push(Token::Symbol(index));
            },
            b'A'..=b'Z' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let token = match &source[start..i] {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    other => {
                        return Err(EvaluationError::syntax(
                            source,
                            format!("unknown keyword '{}'", other),
                        ))
                    },
                };
                tokens.push(token);
            },
            _ => {
                let ch = source[i..].chars().next().unwrap_or('?');
                return Err(EvaluationError::syntax(
                    source,
                    format!("unexpected character '{}' at offset {}", ch, i),
                ));
            },
        }
    }

    Ok(tokens)
}

/// Operand/operator alternation and bracket balance
fn check_grammar(source: &str, tokens: &[Token]) -> Result<()> {
    let mut depth = 0usize;
    // true while an operand (symbol, literal, group) is expected next
    let mut expect_operand = true;

    for token in tokens {
        match token {
            Token::Symbol(_) | Token::Literal(_) => {
                if !expect_operand {
                    return Err(EvaluationError::syntax(source, "missing operator"));
                }
                expect_operand = false;
            },
            Token::Not => {
                if !expect_operand {
                    return Err(EvaluationError::syntax(source, "misplaced negation"));
                }
            },
            Token::And | Token::Or => {
                if expect_operand {
                    return Err(EvaluationError::syntax(source, "missing operand"));
                }
                expect_operand = true;
            },
            Token::Open => {
                if !expect_operand {
                    return Err(EvaluationError::syntax(source, "missing operator before '('"));
                }
                depth += 1;
            },
            Token::Close => {
                if expect_operand {
                    return Err(EvaluationError::syntax(source, "missing operand before ')'"));
                }
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| EvaluationError::syntax(source, "unbalanced ')'"))?;
            },
        }
    }

    if expect_operand {
        return Err(EvaluationError::syntax(source, "formula ends with an operator"));
    }
    if depth != 0 {
        return Err(EvaluationError::syntax(source, "unbalanced '('"));
    }
    Ok(())
}

fn push_rendered(out: &mut String, token: Token) {
    if !out.is_empty() {
        out.push(' ');
    }
    token.render(out);
}

/// A parsed status predicate
#[derive(Clone)]
pub struct Formula {
    source: String,
    canonical: String,
    symbols: Vec<usize>,
    tree: Node,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(EvaluationError::Empty);
        }

        let tokens = tokenize(source)?;
        check_grammar(source, &tokens)?;

        let mut canonical = String::with_capacity(source.len() * 2);
        let mut symbols = Vec::new();
        // Runs of negations reduce to their parity
        let mut negated = false;
        for token in &tokens {
            if *token == Token::Not {
                negated = !negated;
                continue;
            }
            if negated {
                push_rendered(&mut canonical, Token::Not);
                negated = false;
            }
            push_rendered(&mut canonical, *token);
            if let Token::Symbol(index) = token {
                if !symbols.contains(index) {
                    symbols.push(*index);
                }
            }
        }
        symbols.sort_unstable();

        let tree = build_operator_tree(&canonical)
            .map_err(|e| EvaluationError::syntax(source, e.to_string()))?;

        Ok(Self {
            source: source.to_string(),
            canonical,
            symbols,
            tree,
        })
    }

    /// Formula text as written in configuration
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of leading bits the formula needs (highest symbol position + 1)
    pub fn required_bits(&self) -> usize {
        self.symbols.last().map_or(0, |max| max + 1)
    }

    /// Evaluate against bits in symbol order (`bits[0]` is `a`)
    pub fn evaluate(&self, bits: &[bool]) -> Result<bool> {
        if let Some(&missing) = self.symbols.iter().find(|&&index| index >= bits.len()) {
            return Err(EvaluationError::MissingBit {
                formula: self.source.clone(),
                symbol: symbol_for_index(missing),
                available: bits.len(),
            });
        }

        let mut context = HashMapContext::new();
        for &index in &self.symbols {
            context
                .set_value(symbol_for_index(index), Value::Boolean(bits[index]))
                .map_err(|e| EvaluationError::syntax(&self.source, e.to_string()))?;
        }

        self.tree
            .eval_boolean_with_context(&context)
            .map_err(|e| EvaluationError::syntax(&self.source, e.to_string()))
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formula")
            .field("source", &self.source)
            .field("canonical", &self.canonical)
            .finish()
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for Formula {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl FromStr for Formula {
    type Err = EvaluationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn eval(source: &str, bits: &[bool]) -> bool {
        Formula::parse(source).unwrap().evaluate(bits).unwrap()
    }

    #[test]
    fn test_and_or_not_spellings_agree() {
        let bits = [true, false, true, true, false];
        assert!(eval("/a|(b.c)|d", &bits));
        assert!(eval("!a || (b && c) || d", &bits));
        assert!(eval("NOT a OR (b AND c) OR d", &bits));
        assert!(!eval("/a|(b.c)|e", &bits));
    }

    #[test]
    fn test_precedence() {
        // not > and > or
        assert!(eval("a | b . c", &[true, false, false]));
        assert!(!eval("(a | b) . c", &[true, false, false]));
        assert!(eval("/a . b", &[false, true]));
        assert!(!eval("/(a . b)", &[true, true]));
        assert!(eval("//a", &[true]));
    }

    #[test]
    fn test_literals() {
        assert!(eval("1", &[]));
        assert!(!eval("0", &[]));
        assert!(eval("a . 1", &[true]));
        assert!(!eval("a . 0", &[true]));
    }

    #[test]
    fn test_multi_letter_symbols() {
        let mut bits = vec![false; 28];
        bits[26] = true;
        let formula = Formula::parse("aa . /ab").unwrap();
        assert_eq!(formula.required_bits(), 28);
        assert!(formula.evaluate(&bits).unwrap());
        bits[27] = true;
        assert!(!formula.evaluate(&bits).unwrap());
    }

    #[test]
    fn test_missing_bit() {
        let formula = Formula::parse("a . d").unwrap();
        assert_eq!(formula.required_bits(), 4);
        assert_eq!(
            formula.evaluate(&[true, true]),
            Err(EvaluationError::MissingBit {
                formula: "a . d".to_string(),
                symbol: "d".to_string(),
                available: 2,
            })
        );
    }

    #[test]
    fn test_empty_formula() {
        assert_eq!(Formula::parse("   ").unwrap_err(), EvaluationError::Empty);
    }

    #[test]
    fn test_rejected_input() {
        for source in [
            "a +b",
            "a b",
            "a .",
            "(a",
            "a)",
            "a & b",
            "x == 1",
            "A",
            "10",
            "a(b)",
            "aaaa",
            "a; b",
            "func(a)",
        ] {
            assert!(
                matches!(Formula::parse(source), Err(EvaluationError::Syntax { .. })),
                "'{}' should be rejected",
                source
            );
        }
    }

    #[test]
    fn test_canonical_equality() {
        assert_eq!(
            Formula::parse("a.b").unwrap(),
            Formula::parse("a AND b").unwrap()
        );
        assert_ne!(Formula::parse("a.b").unwrap(), Formula::parse("a|b").unwrap());
        assert_eq!(Formula::parse("a . /b").unwrap().to_string(), "a . /b");
    }

    #[test]
    fn test_from_str() {
        let formula: Formula = "c".parse().unwrap();
        assert!(formula.evaluate(&[false, false, true]).unwrap());
    }
}
