//! Minimal recursive-descent Newick parser.
//!
//! Grammar:
//!
//! ```text
//! subtree := '(' subtree (',' subtree)* ')' label? (':' length)?
//!          | label (':' length)?
//! tree    := subtree ';'?
//! ```
//!
//! Parsing produces an owned [`NewickNode`] tree; the arena form used by the
//! planner lives in [`crate::core::alignment_tree`].

use crate::error::NewickError;

/// Deepest parenthesis nesting accepted before parsing gives up.
pub const MAX_DEPTH: usize = 1_000;

/// A parsed Newick node before round binding.
#[derive(Debug, Clone, PartialEq)]
pub struct NewickNode {
    /// Node label. Empty for unnamed internal nodes.
    pub name: String,
    pub length: Option<f64>,
    /// Numeric internal label, interpreted as a support value.
    pub support: Option<f64>,
    pub children: Vec<NewickNode>,
}

impl NewickNode {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: None,
            support: None,
            children: Vec::new(),
        }
    }

}

/// Parse a single Newick tree. Surrounding whitespace and the trailing `;` are
/// optional.
pub fn parse_newick(text: &str) -> Result<NewickNode, NewickError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(NewickError::Empty);
    }
    let mut parser = Parser {
        text,
        bytes: text.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let root = parser.subtree()?;
    parser.skip_ws();
    if parser.peek() == Some(b';') {
        parser.pos += 1;
    }
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(NewickError::TrailingData(parser.pos));
    }
    Ok(root)
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn subtree(&mut self) -> Result<NewickNode, NewickError> {
        self.skip_ws();
        if self.peek() == Some(b'(') {
            if self.depth == MAX_DEPTH {
                return Err(NewickError::TooDeep(self.pos));
            }
            self.depth += 1;
            self.pos += 1;
            let mut children = Vec::new();
            loop {
                children.push(self.subtree()?);
                self.skip_ws();
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(NewickError::ExpectedSeparator(self.pos)),
                }
            }
            self.depth -= 1;
            let label = self.label();
            let length = self.branch_length();
            let (name, support) = split_support(label);
            return Ok(NewickNode {
                name,
                length,
                support,
                children,
            });
        }

        let start = self.pos;
        let label = self.label();
        if label.is_empty() {
            return Err(NewickError::MissingLabel(start));
        }
        let length = self.branch_length();
        Ok(NewickNode {
            length,
            ..NewickNode::leaf(label)
        })
    }

    fn label(&mut self) -> &'a str {
        self.skip_ws();
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b':' | b',' | b'(' | b')' | b';') || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        let end = self.pos;
        self.skip_ws();
        let text = self.text;
        &text[start..end]
    }

    fn branch_length(&mut self) -> Option<f64> {
        self.skip_ws();
        if self.peek() != Some(b':') {
            return None;
        }
        self.pos += 1;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b',' | b'(' | b')' | b';') || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        let text = self.text;
        let token = &text[start..self.pos];
        self.skip_ws();
        token.parse::<f64>().ok()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }
}

/// Internal labels made only of digits and dots are support values.
fn split_support(label: &str) -> (String, Option<f64>) {
    if !label.is_empty() && label.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return (String::new(), label.parse::<f64>().ok());
    }
    (label.to_string(), None)
}
