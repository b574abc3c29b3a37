use std::borrow::Cow;

use super::parsers::{
    is_bind_start, is_block_comment_end, is_block_comment_start, is_line_comment_start,
};
use super::scanner::{State, scan_identifier};

/// Native placeholder syntax a driver expects for bind values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `:name` becomes `@name`.
    Named,
    /// `:name` becomes `@P{n}`, `n` being the 1-based first-occurrence index of `name`.
    Positional,
}

/// SQL after `:name` rewriting plus the referenced bind names in first-occurrence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenSql<'a> {
    pub sql: Cow<'a, str>,
    pub names: Vec<String>,
}

impl RewrittenSql<'_> {
    #[must_use]
    pub fn references(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// Rewrite `:name` binds to the driver's placeholder syntax.
///
/// Quoted strings, `"identifiers"`, `[bracketed]` identifiers and comments are left
/// untouched, as are `::` casts. Returns a borrowed `Cow` when the SQL has no binds.
#[must_use]
pub fn rewrite_named_binds(sql: &str, style: PlaceholderStyle) -> RewrittenSql<'_> {
    let mut names: Vec<String> = Vec::new();
    let mut out: Option<String> = None;
    let mut copied = 0;

    scan_binds(sql, |start, end, name| {
        let position = match names.iter().position(|n| n == name) {
            Some(pos) => pos,
            None => {
                names.push(name.to_owned());
                names.len() - 1
            }
        };
        let buf = out.get_or_insert_with(|| String::with_capacity(sql.len() + 8));
        buf.push_str(&sql[copied..start]);
        match style {
            PlaceholderStyle::Named => {
                buf.push('@');
                buf.push_str(name);
            }
            PlaceholderStyle::Positional => {
                buf.push_str("@P");
                buf.push_str(&(position + 1).to_string());
            }
        }
        copied = end;
    });

    let sql = match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    };
    RewrittenSql { sql, names }
}

fn scan_binds<'s>(sql: &'s str, mut on_bind: impl FnMut(usize, usize, &'s str)) {
    let bytes = sql.as_bytes();
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'[' => state = State::Bracketed,
                _ if is_line_comment_start(bytes, idx) => state = State::LineComment,
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b':' if is_bind_start(bytes, idx) => {
                    if let Some((end, name)) = scan_identifier(bytes, idx + 1) {
                        on_bind(idx, end, name);
                        idx = end;
                        continue;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::Bracketed => {
                if b == b']' {
                    if bytes.get(idx + 1) == Some(&b']') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
        }
        idx += 1;
    }
}
