//! SQL dialect differences the builder has to care about.

use std::fmt;

/// The SQL flavour a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Backtick identifiers, `?` placeholders, `LIMIT offset, count`,
    /// insert id read back from the connection.
    MySql,
    /// Double-quoted identifiers, `$n` placeholders, `LIMIT count OFFSET offset`,
    /// insert id via `RETURNING`.
    Postgres,
}

impl Dialect {
    /// Quote an identifier that already passed [`crate::ident::validate`].
    pub fn quote(self, ident: &str) -> String {
        let mut out = String::with_capacity(ident.len() + 2);
        self.write_quoted(&mut out, ident);
        out
    }

    pub(crate) fn write_quoted(self, out: &mut String, ident: &str) {
        let q = match self {
            Dialect::MySql => '`',
            Dialect::Postgres => '"',
        };
        out.push(q);
        out.push_str(ident);
        out.push(q);
    }

    /// Write the placeholder for the 1-based parameter `index`.
    pub(crate) fn write_placeholder(self, out: &mut String, index: usize) {
        match self {
            Dialect::MySql => out.push('?'),
            Dialect::Postgres => {
                out.push('$');
                out.push_str(&index.to_string());
            }
        }
    }

    /// Render a row window. Both values are validated non-negative integers.
    pub fn limit_clause(self, offset: i64, count: i64) -> String {
        match self {
            Dialect::MySql => format!(" LIMIT {offset}, {count}"),
            Dialect::Postgres if offset == 0 => format!(" LIMIT {count}"),
            Dialect::Postgres => format!(" LIMIT {count} OFFSET {offset}"),
        }
    }

    /// Whether INSERT reports its generated key through `RETURNING`.
    pub fn returns_insert_id(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Aggregate expression over an already-quoted column.
    ///
    /// Postgres returns NUMERIC for `SUM`/`AVG`; cast so the result decodes as a float.
    pub(crate) fn aggregate(self, func: &str, quoted_field: &str) -> String {
        match (self, func) {
            (Dialect::Postgres, "SUM" | "AVG") => {
                format!("CAST({func}({quoted_field}) AS DOUBLE PRECISION)")
            }
            _ => format!("{func}({quoted_field})"),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "pgsql",
        })
    }
}
