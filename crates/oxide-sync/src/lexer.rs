//! A small SQL scanner for surgery on stored definitions.
//!
//! SQLite hands back object definitions as raw text, and several parts of the
//! engine need to look inside them: locating a table's name token, pulling
//! `CHECK` expressions out of a `CREATE TABLE`, finding which views mention a
//! table, and rewriting column names. None of that needs a parser; a token
//! stream with byte spans is enough.

use std::ops::Range;

/// Kind of a scanned token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare word: a keyword or an unquoted identifier.
    Word,
    /// Identifier quoted with `"`, `` ` `` or `[...]`.
    QuotedIdentifier,
    /// Single-quoted string literal.
    String,
    /// Blob literal (`x'..'`).
    Blob,
    /// Numeric literal.
    Number,
    /// Any other single character (punctuation, operators).
    Symbol,
}

/// A token with its location in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    /// Token kind.
    pub kind: TokenKind,
    /// Raw source text, including quotes.
    pub text: &'a str,
    /// Byte range in the source.
    pub span: Range<usize>,
}

impl Token<'_> {
    /// Returns true if this is the bare word `keyword` (case-insensitive).
    #[must_use]
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    /// Returns true if this is the symbol `c`.
    #[must_use]
    pub fn is_symbol(&self, c: char) -> bool {
        self.kind == TokenKind::Symbol && self.text.starts_with(c)
    }

    /// Returns the identifier value with quoting removed, if this token can
    /// name something.
    #[must_use]
    pub fn identifier(&self) -> Option<String> {
        match self.kind {
            TokenKind::Word => Some(self.text.to_string()),
            TokenKind::QuotedIdentifier => {
                let bytes = self.text.as_bytes();
                let close = match bytes[0] {
                    b'[' => b']',
                    open => open,
                };
                if bytes.len() < 2 || bytes[bytes.len() - 1] != close {
                    // unterminated
                    return None;
                }
                let inner = &self.text[1..self.text.len() - 1];
                Some(match close {
                    b'"' => inner.replace("\"\"", "\""),
                    b'`' => inner.replace("``", "`"),
                    _ => inner.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Returns true if this token names `name` (case-insensitive, like SQLite).
    #[must_use]
    pub fn names(&self, name: &str) -> bool {
        self.identifier()
            .is_some_and(|ident| ident.eq_ignore_ascii_case(name))
    }
}

/// Scans SQL text into tokens, skipping whitespace and comments.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer over `input`.
    #[must_use]
    pub const fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.peek().is_some_and(char::is_whitespace) {
                self.advance();
            }

            if self.peek() == Some('-') && self.peek_next() == Some('-') {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.advance();
                }
                continue;
            }

            if self.peek() == Some('/') && self.peek_next() == Some('*') {
                self.advance();
                self.advance();
                loop {
                    match self.advance() {
                        Some('*') if self.peek() == Some('/') => {
                            self.advance();
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }
                continue;
            }

            break;
        }
    }

    /// Consumes up to and including `close`. A doubled `close` is an escape
    /// unless `close` is `]`.
    fn scan_delimited(&mut self, close: char) {
        self.advance();
        while let Some(c) = self.advance() {
            if c == close {
                if close != ']' && self.peek() == Some(close) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
    }

    fn scan_number(&mut self) {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        {
            let c = self.advance();
            if matches!(c, Some('e' | 'E')) && matches!(self.peek(), Some('+' | '-')) {
                self.advance();
            }
        }
    }

    fn scan_word(&mut self) {
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            self.advance();
        }
    }

    fn next_token(&mut self) -> Option<Token<'a>> {
        self.skip_whitespace_and_comments();
        let start = self.pos;
        let c = self.peek()?;

        let kind = match c {
            '\'' => {
                self.scan_delimited('\'');
                TokenKind::String
            }
            '"' | '`' => {
                self.scan_delimited(c);
                TokenKind::QuotedIdentifier
            }
            '[' => {
                self.scan_delimited(']');
                TokenKind::QuotedIdentifier
            }
            'x' | 'X' if self.peek_next() == Some('\'') => {
                self.advance();
                self.scan_delimited('\'');
                TokenKind::Blob
            }
            c if c.is_ascii_digit()
                || (c == '.' && self.peek_next().is_some_and(|n| n.is_ascii_digit())) =>
            {
                self.scan_number();
                TokenKind::Number
            }
            c if c.is_alphabetic() || c == '_' => {
                self.scan_word();
                TokenKind::Word
            }
            _ => {
                self.advance();
                TokenKind::Symbol
            }
        };

        Some(Token {
            kind,
            text: &self.input[start..self.pos],
            span: start..self.pos,
        })
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

/// Tokenizes `sql` into a vector.
#[must_use]
pub fn tokenize(sql: &str) -> Vec<Token<'_>> {
    Lexer::new(sql).collect()
}

/// Quotes an identifier with double quotes.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Locates the object name in a `CREATE ...` statement.
///
/// The returned range covers a schema-qualified name (`main.t`) in full.
#[must_use]
pub fn name_span(sql: &str) -> Option<Range<usize>> {
    const PREFIX: &[&str] = &[
        "CREATE",
        "TEMP",
        "TEMPORARY",
        "UNIQUE",
        "TABLE",
        "VIEW",
        "INDEX",
        "TRIGGER",
        "IF",
        "NOT",
        "EXISTS",
    ];

    let tokens = tokenize(sql);
    let first = tokens
        .iter()
        .position(|t| !PREFIX.iter().any(|kw| t.is_keyword(kw)))?;
    let mut last = first;
    tokens[first].identifier()?;
    while tokens.get(last + 1).is_some_and(|t| t.is_symbol('.'))
        && tokens.get(last + 2).and_then(Token::identifier).is_some()
    {
        last += 2;
    }
    Some(tokens[first].span.start..tokens[last].span.end)
}

/// Replaces the object name of a `CREATE ...` statement with `replacement`,
/// which is inserted verbatim.
#[must_use]
pub fn replace_name(sql: &str, replacement: &str) -> Option<String> {
    let span = name_span(sql)?;
    Some(format!(
        "{}{}{}",
        &sql[..span.start],
        replacement,
        &sql[span.end..]
    ))
}

/// Returns true if any identifier token in `sql` names `name`.
#[must_use]
pub fn mentions(sql: &str, name: &str) -> bool {
    Lexer::new(sql).any(|t| t.names(name))
}

/// Rewrites every identifier token naming `old` to the quoted form of `new`.
#[must_use]
pub fn rename_identifier(sql: &str, old: &str, new: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    for token in Lexer::new(sql).filter(|t| t.names(old)) {
        out.push_str(&sql[cursor..token.span.start]);
        out.push_str(&quote_identifier(new));
        cursor = token.span.end;
    }
    out.push_str(&sql[cursor..]);
    out
}

/// Returns the distinct identifiers referenced by an expression.
#[must_use]
pub fn identifiers(expr: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for ident in Lexer::new(expr).filter_map(|t| t.identifier()) {
        if !out.iter().any(|o| o.eq_ignore_ascii_case(&ident)) {
            out.push(ident);
        }
    }
    out
}

/// Parts of a `CREATE TABLE` body that `PRAGMA` introspection cannot see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDefinitionExtras {
    /// `CHECK` expressions in declaration order, without the parentheses.
    pub checks: Vec<String>,
    /// Whether the `AUTOINCREMENT` keyword appears.
    pub auto_increment: bool,
    /// Whether the table is declared `WITHOUT ROWID`.
    pub without_rowid: bool,
    /// Whether the table is declared `STRICT`.
    pub strict: bool,
    /// `(column, collation)` for every column declared with `COLLATE`.
    pub collations: Vec<(String, String)>,
    /// Whether any column is generated (`GENERATED ALWAYS AS` or `AS (...)`).
    pub generated: bool,
}

/// Words that open a table constraint rather than a column definition.
const TABLE_CONSTRAINT_KEYWORDS: &[&str] =
    &["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

/// Scans a `CREATE TABLE` statement for checks, collations and table
/// options.
#[must_use]
pub fn table_extras(sql: &str) -> TableDefinitionExtras {
    let tokens = tokenize(sql);
    let mut extras = TableDefinitionExtras::default();
    let mut depth = 0usize;
    let mut body_closed = false;
    // Column being defined; `None` inside a table constraint.
    let mut column: Option<String> = None;
    let mut segment_start = false;

    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        if segment_start && depth == 1 {
            segment_start = false;
            if !TABLE_CONSTRAINT_KEYWORDS.iter().any(|kw| token.is_keyword(kw)) {
                column = token.identifier();
                i += 1;
                continue;
            }
            column = None;
        }

        if token.is_symbol('(') {
            depth += 1;
            if depth == 1 && !body_closed {
                segment_start = true;
            }
        } else if token.is_symbol(')') {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                body_closed = true;
            }
        } else if body_closed && depth == 0 {
            if token.is_keyword("WITHOUT")
                && tokens.get(i + 1).is_some_and(|t| t.is_keyword("ROWID"))
            {
                extras.without_rowid = true;
            } else if token.is_keyword("STRICT") {
                extras.strict = true;
            }
        } else if depth == 1 {
            if token.is_symbol(',') {
                segment_start = true;
            } else if token.is_keyword("AUTOINCREMENT") {
                extras.auto_increment = true;
            } else if token.is_keyword("COLLATE") {
                let collation = tokens.get(i + 1).and_then(Token::identifier);
                if let (Some(name), Some(collation)) = (&column, collation) {
                    extras.collations.push((name.clone(), collation));
                    i += 2;
                    continue;
                }
            } else if column.is_some()
                && (token.is_keyword("GENERATED")
                    || (token.is_keyword("AS")
                        && tokens.get(i + 1).is_some_and(|t| t.is_symbol('('))))
            {
                extras.generated = true;
            } else if token.is_keyword("CHECK")
                && tokens.get(i + 1).is_some_and(|t| t.is_symbol('('))
            {
                if let Some((expr, close)) = balanced(sql, &tokens, i + 1) {
                    extras.checks.push(expr);
                    i = close + 1;
                    continue;
                }
            }
        }
        i += 1;
    }

    extras
}

/// Returns the trimmed text between the parenthesis at `open` and its match,
/// along with the index of the closing token.
fn balanced(sql: &str, tokens: &[Token<'_>], open: usize) -> Option<(String, usize)> {
    let mut depth = 0usize;
    for (offset, token) in tokens[open..].iter().enumerate() {
        if token.is_symbol('(') {
            depth += 1;
        } else if token.is_symbol(')') {
            depth -= 1;
            if depth == 0 {
                let inner = &sql[tokens[open].span.end..token.span.start];
                return Some((inner.trim().to_string(), open + offset));
            }
        }
    }
    None
}

/// Returns true if `expr` can follow `DEFAULT` without parentheses.
#[must_use]
pub fn is_literal(expr: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "NULL",
        "TRUE",
        "FALSE",
        "CURRENT_TIME",
        "CURRENT_DATE",
        "CURRENT_TIMESTAMP",
    ];

    let tokens = tokenize(expr);
    match tokens.as_slice() {
        [t] => match t.kind {
            TokenKind::Number | TokenKind::String | TokenKind::Blob => true,
            TokenKind::Word => KEYWORDS.iter().any(|kw| t.is_keyword(kw)),
            _ => false,
        },
        [sign, number] => {
            (sign.is_symbol('-') || sign.is_symbol('+')) && number.kind == TokenKind::Number
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_kinds() {
        let tokens = tokenize(r#"SELECT "a b", [c], 'it''s', x'00', 1.5e-3 -- tail"#);
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Word,
                TokenKind::QuotedIdentifier,
                TokenKind::Symbol,
                TokenKind::QuotedIdentifier,
                TokenKind::Symbol,
                TokenKind::String,
                TokenKind::Symbol,
                TokenKind::Blob,
                TokenKind::Symbol,
                TokenKind::Number,
            ]
        );
        assert_eq!(tokens[1].identifier().as_deref(), Some("a b"));
        assert_eq!(tokens[3].identifier().as_deref(), Some("c"));
        assert_eq!(tokens[9].text, "1.5e-3");
    }

    #[test]
    fn test_name_span_variants() {
        let sql = r#"CREATE TABLE "my ""t""" (id)"#;
        let span = name_span(sql).unwrap();
        assert_eq!(&sql[span], r#""my ""t""""#);

        let sql = "CREATE UNIQUE INDEX IF NOT EXISTS idx ON t (a)";
        assert_eq!(&sql[name_span(sql).unwrap()], "idx");

        let sql = "CREATE TABLE main.t(id)";
        assert_eq!(&sql[name_span(sql).unwrap()], "main.t");
    }

    #[test]
    fn test_replace_name() {
        let sql = "CREATE TABLE users (id INTEGER)";
        assert_eq!(
            replace_name(sql, "\"users\"").unwrap(),
            "CREATE TABLE \"users\" (id INTEGER)"
        );
    }

    #[test]
    fn test_mentions_ignores_strings_and_substrings() {
        let sql = "CREATE VIEW v AS SELECT 'users' AS label FROM accounts_users";
        assert!(!mentions(sql, "users"));
        assert!(mentions("CREATE VIEW v AS SELECT * FROM \"Users\"", "users"));
    }

    #[test]
    fn test_rename_identifier() {
        let expr = "name <> '' AND length(name) < 10";
        assert_eq!(
            rename_identifier(expr, "name", "full_name"),
            "\"full_name\" <> '' AND length(\"full_name\") < 10"
        );
    }

    #[test]
    fn test_table_extras() {
        let sql = "CREATE TABLE t (\n  id INTEGER PRIMARY KEY AUTOINCREMENT,\n  age INTEGER CHECK (age > 0),\n  CONSTRAINT c CHECK (length(name) > (1))\n) WITHOUT ROWID, STRICT";
        let extras = table_extras(sql);
        assert_eq!(extras.checks, vec!["age > 0", "length(name) > (1)"]);
        assert!(extras.auto_increment);
        assert!(extras.without_rowid);
        assert!(extras.strict);
        assert!(extras.collations.is_empty());
        assert!(!extras.generated);
    }

    #[test]
    fn test_table_extras_collations_and_generated() {
        let sql = r#"CREATE TABLE t (
            id INTEGER PRIMARY KEY,
            "Name" TEXT COLLATE NOCASE UNIQUE,
            code TEXT NOT NULL COLLATE rtrim,
            UNIQUE (code COLLATE binary)
        )"#;
        let extras = table_extras(sql);
        assert_eq!(
            extras.collations,
            vec![
                ("Name".to_string(), "NOCASE".to_string()),
                ("code".to_string(), "rtrim".to_string()),
            ]
        );
        assert!(!extras.generated);

        let sql = "CREATE TABLE t (a INTEGER, b INTEGER GENERATED ALWAYS AS (a * 2))";
        assert!(table_extras(sql).generated);
        let sql = "CREATE TABLE t (a INTEGER, b AS (a * 2) STORED)";
        assert!(table_extras(sql).generated);
    }

    #[test]
    fn test_is_literal() {
        assert!(is_literal("0"));
        assert!(is_literal("-1.5"));
        assert!(is_literal("'abc'"));
        assert!(is_literal("NULL"));
        assert!(is_literal("CURRENT_TIMESTAMP"));
        assert!(!is_literal("datetime('now')"));
        assert!(!is_literal("1 + 2"));
    }
}
