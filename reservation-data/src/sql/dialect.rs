//! SQL dialects
//!
//! Statements are generated once in a dialect-neutral `@name` parameter form.
//! The dialect decides table quoting, how generated values are echoed back,
//! and how named parameters are rendered for the driver.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::binder::Command;

/// Target SQL dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Bracket-quoted tables, `OUTPUT INSERTED.*` echo-back, `@name` parameters
    SqlServer,
    /// Double-quoted tables, `RETURNING` echo-back, `$n` parameters
    Postgres,
    /// Double-quoted tables, `RETURNING` echo-back, `?n` parameters
    #[default]
    Sqlite,
}

impl Dialect {
    /// Infer the dialect from a connection URL scheme
    ///
    /// ```rust
    /// use reservation_data::sql::Dialect;
    ///
    /// assert_eq!(Dialect::from_url("sqlite::memory:"), Some(Dialect::Sqlite));
    /// assert_eq!(Dialect::from_url("postgres://localhost/app"), Some(Dialect::Postgres));
    /// assert_eq!(Dialect::from_url("mssql://db/app"), Some(Dialect::SqlServer));
    /// assert_eq!(Dialect::from_url("redis://localhost"), None);
    /// ```
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "sqlite" => Some(Self::Sqlite),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mssql" | "sqlserver" => Some(Self::SqlServer),
            _ => None,
        }
    }

    /// Quote a table name
    pub fn quote_table(&self, table: &str) -> String {
        match self {
            Self::SqlServer => format!("[{table}]"),
            Self::Postgres | Self::Sqlite => format!("\"{table}\""),
        }
    }

    /// Whether echo-back is placed inside the statement (`OUTPUT`) rather
    /// than appended (`RETURNING`)
    pub fn echoes_inline(&self) -> bool {
        matches!(self, Self::SqlServer)
    }

    /// Echo-back clause for the given columns, with a leading space
    pub(crate) fn echo_clause(&self, columns: &[&str]) -> String {
        if columns.is_empty() {
            return String::new();
        }
        match self {
            Self::SqlServer => {
                let inserted: Vec<String> =
                    columns.iter().map(|c| format!("INSERTED.{c}")).collect();
                format!(" OUTPUT {}", inserted.join(","))
            }
            Self::Postgres | Self::Sqlite => format!(" RETURNING {}", columns.join(",")),
        }
    }

    /// Rewrite `@name` placeholders into the driver's parameter syntax
    ///
    /// Each name maps to the 1-based position of the first parameter with
    /// that name, so a name used twice refers to one slot. Unknown names and
    /// text inside string literals are left untouched.
    ///
    /// ```rust
    /// use reservation_data::binder::{bind, Command};
    /// use reservation_data::sql::Dialect;
    /// use reservation_data::value::{DeclaredType, ValueType};
    ///
    /// let mut command = Command::new("SELECT * FROM t WHERE a=@k0 OR b=@k0 OR c=@k1");
    /// bind(&mut command, "k0", 1_i64.into(), DeclaredType::required(ValueType::Int));
    /// bind(&mut command, "k1", 2_i64.into(), DeclaredType::required(ValueType::Int));
    ///
    /// assert_eq!(
    ///     Dialect::Postgres.render_placeholders(&command),
    ///     "SELECT * FROM t WHERE a=$1 OR b=$1 OR c=$2"
    /// );
    /// assert_eq!(
    ///     Dialect::Sqlite.render_placeholders(&command),
    ///     "SELECT * FROM t WHERE a=?1 OR b=?1 OR c=?2"
    /// );
    /// assert_eq!(Dialect::SqlServer.render_placeholders(&command), command.sql);
    /// ```
    pub fn render_placeholders(&self, command: &Command) -> String {
        let marker = match self {
            Self::SqlServer => return command.sql.clone(),
            Self::Postgres => '$',
            Self::Sqlite => '?',
        };

        let sql = command.sql.as_str();
        let mut out = String::with_capacity(sql.len());
        let mut in_literal = false;
        let mut chars = sql.char_indices().peekable();
        while let Some((start, ch)) = chars.next() {
            if ch == '\'' {
                in_literal = !in_literal;
                out.push(ch);
                continue;
            }
            if ch != '@' || in_literal {
                out.push(ch);
                continue;
            }

            let mut end = start + 1;
            while let Some(&(i, next)) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    end = i + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let name = &sql[start + 1..end];
            match command.index_of(name) {
                Some(index) if !name.is_empty() => {
                    out.push(marker);
                    out.push_str(&(index + 1).to_string());
                }
                _ => out.push_str(&sql[start..end]),
            }
        }
        out
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqlServer => write!(f, "sqlserver"),
            Self::Postgres => write!(f, "postgres"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use figment::providers::Format;
    use crate::value::{DeclaredType, Value, ValueType};

    fn command(sql: &str, names: &[&str]) -> Command {
        let mut command = Command::new(sql);
        for name in names {
            bind(
                &mut command,
                *name,
                Value::Int(0),
                DeclaredType::required(ValueType::Int),
            );
        }
        command
    }

    #[test]
    fn test_quote_table() {
        assert_eq!(Dialect::SqlServer.quote_table("Stations"), "[Stations]");
        assert_eq!(Dialect::Postgres.quote_table("Stations"), "\"Stations\"");
    }

    #[test]
    fn test_echo_clause() {
        assert_eq!(
            Dialect::SqlServer.echo_clause(&["id", "created"]),
            " OUTPUT INSERTED.id,INSERTED.created"
        );
        assert_eq!(Dialect::Sqlite.echo_clause(&["id"]), " RETURNING id");
        assert_eq!(Dialect::Postgres.echo_clause(&[]), "");
    }

    #[test]
    fn test_prefix_names_do_not_collide() {
        let cmd = command("a=@p1 AND b=@p10 AND c=@p1_0", &["p1", "p10", "p1_0"]);
        assert_eq!(Dialect::Postgres.render_placeholders(&cmd), "a=$1 AND b=$2 AND c=$3");
    }

    #[test]
    fn test_unknown_names_and_literals_untouched() {
        let cmd = command("x = '@p0' AND y = @p0 AND z = @missing AND w = @", &["p0"]);
        assert_eq!(
            Dialect::Sqlite.render_placeholders(&cmd),
            "x = '@p0' AND y = ?1 AND z = @missing AND w = @"
        );
    }

    #[test]
    fn test_dialect_config_names() {
        #[derive(Deserialize)]
        struct Holder {
            dialect: Dialect,
        }
        let holder: Holder = figment::Figment::from(figment::providers::Toml::string(
            "dialect = \"sqlserver\"",
        ))
        .extract()
        .unwrap();
        assert_eq!(holder.dialect, Dialect::SqlServer);
        assert_eq!(Dialect::SqlServer.to_string(), "sqlserver");
    }
}
