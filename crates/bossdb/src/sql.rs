//! Parameter-safe statement assembly.
//!
//! [`Statement`] keeps SQL text and bind values side by side and renders
//! placeholders for its [`Dialect`]. Caller templates use `?`; they are
//! rewritten to `$n` on Postgres with indices computed while building.

use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::value::Value;

/// A fully rendered SQL statement plus its ordered bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    dialect: Dialect,
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Parse a caller-supplied `?` template into a statement.
    pub fn from_template(dialect: Dialect, template: &str, values: Vec<Value>) -> DbResult<Self> {
        let mut stmt = Self::new(dialect);
        stmt.push_template(template, values)?;
        Ok(stmt)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }

    /// Append raw SQL. Never pass user input here.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a quoted identifier (must already be validated).
    pub fn push_ident(&mut self, ident: &str) -> &mut Self {
        self.dialect.write_quoted(&mut self.sql, ident);
        self
    }

    /// Append a placeholder bound to `value`.
    pub fn push_bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.params.push(value.into());
        self.dialect.write_placeholder(&mut self.sql, self.params.len());
        self
    }

    /// Append `(?, ?, ...)` for each value.
    pub fn push_bind_group(&mut self, values: impl IntoIterator<Item = Value>) -> &mut Self {
        self.sql.push('(');
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.push_bind(value);
        }
        self.sql.push(')');
        self
    }

    /// Append a template with `?` placeholders.
    ///
    /// `?` inside quoted literals or quoted identifiers is left alone. The
    /// number of placeholders must match `values.len()`.
    pub fn push_template(&mut self, template: &str, values: Vec<Value>) -> DbResult<&mut Self> {
        let expected = count_placeholders(template);
        if expected != values.len() {
            return Err(DbError::validation(format!(
                "template has {expected} placeholder(s) but {} value(s) were bound: {template}",
                values.len()
            )));
        }

        let mut values = values.into_iter();
        let mut quote: Option<char> = None;
        for ch in template.chars() {
            match quote {
                Some(q) => {
                    if ch == q {
                        quote = None;
                    }
                    self.sql.push(ch);
                }
                None => match ch {
                    '\'' | '"' | '`' => {
                        quote = Some(ch);
                        self.sql.push(ch);
                    }
                    '?' => {
                        if let Some(value) = values.next() {
                            self.push_bind(value);
                        }
                    }
                    _ => self.sql.push(ch),
                },
            }
        }
        Ok(self)
    }

    /// Append the dialect's row window clause.
    pub fn push_limit(&mut self, offset: i64, count: i64) -> &mut Self {
        let clause = self.dialect.limit_clause(offset, count);
        self.sql.push_str(&clause);
        self
    }
}

/// Count `?` placeholders outside quoted sections.
///
/// A doubled quote (`'it''s'`) closes and reopens the literal, which leaves
/// the count unaffected.
pub fn count_placeholders(template: &str) -> usize {
    let mut quote: Option<char> = None;
    let mut count = 0;
    for ch in template.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '?' => count += 1,
                _ => {}
            },
        }
    }
    count
}

/// Strip leading whitespace, SQL comments (`--` and `/* */`), and parentheses
/// from a SQL string to find the first meaningful keyword.
pub(crate) fn strip_sql_prefix(sql: &str) -> &str {
    let mut s = sql;
    loop {
        let before = s;
        s = s.trim_start();
        if s.starts_with("--") {
            match s.find('\n') {
                Some(pos) => {
                    s = &s[pos + 1..];
                    continue;
                }
                None => return "",
            }
        }
        if s.starts_with("/*") {
            match s.find("*/") {
                Some(pos) => {
                    s = &s[pos + 2..];
                    continue;
                }
                None => return "",
            }
        }
        if let Some(rest) = s.strip_prefix('(') {
            s = rest;
            continue;
        }
        if s == before {
            break;
        }
    }
    s
}

/// Case-insensitive keyword check that requires a word boundary after the keyword.
pub(crate) fn starts_with_keyword(s: &str, keyword: &str) -> bool {
    let Some(head) = s.get(..keyword.len()) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(keyword) {
        return false;
    }
    s[keyword.len()..]
        .chars()
        .next()
        .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '_'))
}
