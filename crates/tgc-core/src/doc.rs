//! A small pretty-printing primitive shared by the codegen printer.
//!
//! A `Doc` is an immutable sequence of tokens -- text fragments and
//! newlines carrying an indent level. `Doc + Doc` concatenates;
//! `doc.indent(n)` returns a new `Doc` with every contained newline's
//! indent level raised by `n`, without mutating the original.

use std::fmt;
use std::ops::{Add, AddAssign};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    NewLine(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Doc {
    tokens: Vec<Token>,
}

impl Doc {
    pub fn new() -> Self {
        Doc { tokens: Vec::new() }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Doc { tokens: vec![Token::Text(s.into())] }
    }

    pub fn newline() -> Self {
        Doc { tokens: vec![Token::NewLine(0)] }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Joins `docs` with `sep` between each pair, the way a parameter
    /// list is printed as `a, b, c`.
    pub fn join(docs: impl IntoIterator<Item = Doc>, sep: &str) -> Self {
        let mut out = Doc::new();
        for (i, d) in docs.into_iter().enumerate() {
            if i > 0 {
                out += Doc::text(sep);
            }
            out += d;
        }
        out
    }

    /// Returns a new `Doc` with every newline's indent level raised by
    /// `inc`. Does not mutate `self`.
    pub fn indent(&self, inc: u32) -> Self {
        let tokens = self
            .tokens
            .iter()
            .map(|t| match t {
                Token::Text(s) => Token::Text(s.clone()),
                Token::NewLine(n) => Token::NewLine(n + inc),
            })
            .collect();
        Doc { tokens }
    }
}

impl Add for Doc {
    type Output = Doc;
    fn add(mut self, rhs: Doc) -> Doc {
        self.tokens.extend(rhs.tokens);
        self
    }
}

impl AddAssign for Doc {
    fn add_assign(&mut self, rhs: Doc) {
        self.tokens.extend(rhs.tokens);
    }
}

impl fmt::Display for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            match token {
                Token::Text(s) => write!(f, "{s}")?,
                Token::NewLine(indent) => {
                    writeln!(f)?;
                    for _ in 0..*indent {
                        write!(f, "    ")?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenation_preserves_order() {
        let doc = Doc::text("a") + Doc::text("b") + Doc::text("c");
        assert_eq!(doc.to_string(), "abc");
    }

    #[test]
    fn newline_renders_with_indent() {
        let doc = Doc::text("{") + Doc::newline().indent(1) + Doc::text("x;") + Doc::newline() + Doc::text("}");
        assert_eq!(doc.to_string(), "{\n    x;\n}");
    }

    #[test]
    fn indent_does_not_mutate_original() {
        let base = Doc::newline();
        let shifted = base.indent(2);
        assert_eq!(base.to_string(), "\n");
        assert_eq!(shifted.to_string(), "\n        ");
    }

    #[test]
    fn join_inserts_separator_between_items_only() {
        let doc = Doc::join(vec![Doc::text("a"), Doc::text("b"), Doc::text("c")], ", ");
        assert_eq!(doc.to_string(), "a, b, c");
    }

    #[test]
    fn add_assign_appends_in_place() {
        let mut doc = Doc::text("x");
        doc += Doc::text("y");
        assert_eq!(doc.to_string(), "xy");
    }
}
