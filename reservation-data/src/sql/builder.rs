//! SQL statement text for single and bulk writes
//!
//! Every function here is pure: it takes a dialect, a table name, column
//! lists and parameter namers, and returns SQL text with `@name`
//! placeholders. Binding values under the same names is the caller's job.
//!
//! With [`Dialect::SqlServer`] the output is, byte for byte:
//!
//! ```text
//! INSERT INTO [t] (a,b) OUTPUT INSERTED.id VALUES (@p0,@p1)
//! INSERT INTO [t] (a,b) VALUES (@p0_0,@p0_1),(@p1_0,@p1_1)
//! UPDATE [t] SET a = @set0, b = @set1 WHERE id=@key0
//! UPDATE [t] SET a = CASE WHEN (id=@key0_0) THEN @set0_0 WHEN (id=@key0_1) THEN @set0_1 ELSE a END WHERE (id=@wkey0_0) OR (id=@wkey0_1)
//! DELETE FROM [t] WHERE id=@key0
//! DELETE FROM [t] WHERE (id=@key0_0) OR (id=@key0_1)
//! ```

use super::Dialect;

/// `p{index}`
pub fn param_name(index: usize) -> String {
    format!("p{index}")
}

/// `p{row}_{column}`
pub fn bulk_param_name(row: usize, column: usize) -> String {
    format!("p{row}_{column}")
}

/// `set{index}`
pub fn set_param_name(index: usize) -> String {
    format!("set{index}")
}

/// `key{index}`
pub fn key_param_name(index: usize) -> String {
    format!("key{index}")
}

/// `set{column}_{row}`
pub fn bulk_set_param_name(column: usize, row: usize) -> String {
    format!("set{column}_{row}")
}

/// `key{key}_{row}`
pub fn bulk_key_param_name(key: usize, row: usize) -> String {
    format!("key{key}_{row}")
}

/// `wkey{key}_{row}`
pub fn bulk_where_param_name(key: usize, row: usize) -> String {
    format!("wkey{key}_{row}")
}

fn inline_echo(dialect: Dialect, echo: &[&str]) -> String {
    if dialect.echoes_inline() {
        dialect.echo_clause(echo)
    } else {
        String::new()
    }
}

fn trailing_echo(dialect: Dialect, echo: &[&str]) -> String {
    if dialect.echoes_inline() {
        String::new()
    } else {
        dialect.echo_clause(echo)
    }
}

fn key_conjunction(keys: &[&str], row: usize, namer: &impl Fn(usize, usize) -> String) -> String {
    let terms: Vec<String> = keys
        .iter()
        .enumerate()
        .map(|(k, key)| format!("{key}=@{}", namer(k, row)))
        .collect();
    format!("({})", terms.join(" AND "))
}

/// `SELECT a,b,c FROM [t]`
pub fn build_select_all(dialect: Dialect, table: &str, columns: &[&str]) -> String {
    format!("SELECT {} FROM {}", columns.join(","), dialect.quote_table(table))
}

/// Single-row INSERT with optional echo-back of `echo` columns
///
/// ```rust
/// use reservation_data::sql::{builder, Dialect};
///
/// let sql = builder::build_insert(
///     Dialect::SqlServer,
///     "Stations",
///     &["name", "city"],
///     &["id"],
///     builder::param_name,
/// );
/// assert_eq!(sql, "INSERT INTO [Stations] (name,city) OUTPUT INSERTED.id VALUES (@p0,@p1)");
///
/// let sql = builder::build_insert(Dialect::Sqlite, "Stations", &["name"], &["id"], builder::param_name);
/// assert_eq!(sql, "INSERT INTO \"Stations\" (name) VALUES (@p0) RETURNING id");
/// ```
pub fn build_insert(
    dialect: Dialect,
    table: &str,
    columns: &[&str],
    echo: &[&str],
    namer: impl Fn(usize) -> String,
) -> String {
    let table = dialect.quote_table(table);
    if columns.is_empty() {
        return format!(
            "INSERT INTO {table}{} DEFAULT VALUES{}",
            inline_echo(dialect, echo),
            trailing_echo(dialect, echo)
        );
    }
    let values: Vec<String> = (0..columns.len()).map(|i| format!("@{}", namer(i))).collect();
    format!(
        "INSERT INTO {table} ({}){} VALUES ({}){}",
        columns.join(","),
        inline_echo(dialect, echo),
        values.join(","),
        trailing_echo(dialect, echo)
    )
}

/// Multi-row INSERT, one value tuple per row
///
/// `namer` receives `(row, column)`.
pub fn build_bulk_insert(
    dialect: Dialect,
    table: &str,
    columns: &[&str],
    echo: &[&str],
    rows: usize,
    namer: impl Fn(usize, usize) -> String,
) -> String {
    let tuples: Vec<String> = (0..rows)
        .map(|row| {
            let values: Vec<String> = (0..columns.len())
                .map(|col| format!("@{}", namer(row, col)))
                .collect();
            format!("({})", values.join(","))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}){} VALUES {}{}",
        dialect.quote_table(table),
        columns.join(","),
        inline_echo(dialect, echo),
        tuples.join(","),
        trailing_echo(dialect, echo)
    )
}

/// Single-row UPDATE keyed on every key column
///
/// ```rust
/// use reservation_data::sql::{builder, Dialect};
///
/// let sql = builder::build_update(
///     Dialect::SqlServer,
///     "Seats",
///     &["label", "price"],
///     &["train", "seat_no"],
///     &[],
///     builder::set_param_name,
///     builder::key_param_name,
/// );
/// assert_eq!(
///     sql,
///     "UPDATE [Seats] SET label = @set0, price = @set1 WHERE train=@key0 AND seat_no=@key1"
/// );
/// ```
pub fn build_update(
    dialect: Dialect,
    table: &str,
    set_columns: &[&str],
    key_columns: &[&str],
    echo: &[&str],
    set_namer: impl Fn(usize) -> String,
    key_namer: impl Fn(usize) -> String,
) -> String {
    let assignments: Vec<String> = set_columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = @{}", set_namer(i)))
        .collect();
    let predicate: Vec<String> = key_columns
        .iter()
        .enumerate()
        .map(|(i, key)| format!("{key}=@{}", key_namer(i)))
        .collect();
    format!(
        "UPDATE {} SET {}{} WHERE {}{}",
        dialect.quote_table(table),
        assignments.join(", "),
        inline_echo(dialect, echo),
        predicate.join(" AND "),
        trailing_echo(dialect, echo)
    )
}

/// OR of per-row key conjunctions: `(k0=@x0_0 AND k1=@x1_0) OR (...)`
///
/// `namer` receives `(key, row)`.
pub fn build_bulk_where(
    key_columns: &[&str],
    rows: usize,
    namer: impl Fn(usize, usize) -> String,
) -> String {
    let disjuncts: Vec<String> = (0..rows)
        .map(|row| key_conjunction(key_columns, row, &namer))
        .collect();
    disjuncts.join(" OR ")
}

/// Multi-row UPDATE that picks each row's new value with a CASE per column
///
/// `set_namer` receives `(column, row)`; `key_namer` and `where_namer`
/// receive `(key, row)`.
///
/// ```rust
/// use reservation_data::sql::{builder, Dialect};
///
/// let sql = builder::build_bulk_update(
///     Dialect::SqlServer,
///     "Stations",
///     &["city"],
///     &["id"],
///     &[],
///     2,
///     builder::bulk_set_param_name,
///     builder::bulk_key_param_name,
///     builder::bulk_where_param_name,
/// );
/// assert_eq!(
///     sql,
///     "UPDATE [Stations] SET city = CASE WHEN (id=@key0_0) THEN @set0_0 \
///      WHEN (id=@key0_1) THEN @set0_1 ELSE city END \
///      WHERE (id=@wkey0_0) OR (id=@wkey0_1)"
/// );
/// ```
#[allow(clippy::too_many_arguments)]
pub fn build_bulk_update(
    dialect: Dialect,
    table: &str,
    set_columns: &[&str],
    key_columns: &[&str],
    echo: &[&str],
    rows: usize,
    set_namer: impl Fn(usize, usize) -> String,
    key_namer: impl Fn(usize, usize) -> String,
    where_namer: impl Fn(usize, usize) -> String,
) -> String {
    let assignments: Vec<String> = set_columns
        .iter()
        .enumerate()
        .map(|(c, col)| {
            let arms: Vec<String> = (0..rows)
                .map(|row| {
                    format!(
                        "WHEN {} THEN @{}",
                        key_conjunction(key_columns, row, &key_namer),
                        set_namer(c, row)
                    )
                })
                .collect();
            format!("{col} = CASE {} ELSE {col} END", arms.join(" "))
        })
        .collect();
    format!(
        "UPDATE {} SET {}{} WHERE {}{}",
        dialect.quote_table(table),
        assignments.join(", "),
        inline_echo(dialect, echo),
        build_bulk_where(key_columns, rows, where_namer),
        trailing_echo(dialect, echo)
    )
}

/// Single-row DELETE keyed on every key column
pub fn build_delete(
    dialect: Dialect,
    table: &str,
    key_columns: &[&str],
    namer: impl Fn(usize) -> String,
) -> String {
    let predicate: Vec<String> = key_columns
        .iter()
        .enumerate()
        .map(|(i, key)| format!("{key}=@{}", namer(i)))
        .collect();
    format!(
        "DELETE FROM {} WHERE {}",
        dialect.quote_table(table),
        predicate.join(" AND ")
    )
}

/// Multi-row DELETE; `namer` receives `(key, row)`
pub fn build_bulk_delete(
    dialect: Dialect,
    table: &str,
    key_columns: &[&str],
    rows: usize,
    namer: impl Fn(usize, usize) -> String,
) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        dialect.quote_table(table),
        build_bulk_where(key_columns, rows, namer)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_without_echo() {
        let sql = build_insert(Dialect::SqlServer, "Stations", &["name", "city"], &[], param_name);
        assert_eq!(sql, "INSERT INTO [Stations] (name,city) VALUES (@p0,@p1)");
    }

    #[test]
    fn test_insert_with_two_echo_columns() {
        let sql = build_insert(
            Dialect::SqlServer,
            "Stations",
            &["name"],
            &["id", "created_at"],
            param_name,
        );
        assert_eq!(
            sql,
            "INSERT INTO [Stations] (name) OUTPUT INSERTED.id,INSERTED.created_at VALUES (@p0)"
        );
    }

    #[test]
    fn test_insert_all_computed() {
        assert_eq!(
            build_insert(Dialect::SqlServer, "Tickets", &[], &["id"], param_name),
            "INSERT INTO [Tickets] OUTPUT INSERTED.id DEFAULT VALUES"
        );
        assert_eq!(
            build_insert(Dialect::Postgres, "Tickets", &[], &["id"], param_name),
            "INSERT INTO \"Tickets\" DEFAULT VALUES RETURNING id"
        );
    }

    #[test]
    fn test_bulk_insert() {
        let sql = build_bulk_insert(
            Dialect::SqlServer,
            "Stations",
            &["name", "city"],
            &["id"],
            3,
            bulk_param_name,
        );
        assert_eq!(
            sql,
            "INSERT INTO [Stations] (name,city) OUTPUT INSERTED.id VALUES \
             (@p0_0,@p0_1),(@p1_0,@p1_1),(@p2_0,@p2_1)"
        );
    }

    #[test]
    fn test_bulk_insert_returning() {
        let sql = build_bulk_insert(
            Dialect::Sqlite,
            "Stations",
            &["name"],
            &["id", "name"],
            2,
            bulk_param_name,
        );
        assert_eq!(
            sql,
            "INSERT INTO \"Stations\" (name) VALUES (@p0_0),(@p1_0) RETURNING id,name"
        );
    }

    #[test]
    fn test_update_with_echo() {
        let sql = build_update(
            Dialect::SqlServer,
            "Stations",
            &["name"],
            &["id"],
            &["version"],
            set_param_name,
            key_param_name,
        );
        assert_eq!(
            sql,
            "UPDATE [Stations] SET name = @set0 OUTPUT INSERTED.version WHERE id=@key0"
        );
        let sql = build_update(
            Dialect::Postgres,
            "Stations",
            &["name"],
            &["id"],
            &["version"],
            set_param_name,
            key_param_name,
        );
        assert_eq!(
            sql,
            "UPDATE \"Stations\" SET name = @set0 WHERE id=@key0 RETURNING version"
        );
    }

    #[test]
    fn test_bulk_update_composite_key() {
        let sql = build_bulk_update(
            Dialect::SqlServer,
            "Seats",
            &["label", "price"],
            &["train", "seat_no"],
            &[],
            2,
            bulk_set_param_name,
            bulk_key_param_name,
            bulk_where_param_name,
        );
        assert_eq!(
            sql,
            "UPDATE [Seats] SET \
             label = CASE WHEN (train=@key0_0 AND seat_no=@key1_0) THEN @set0_0 \
             WHEN (train=@key0_1 AND seat_no=@key1_1) THEN @set0_1 ELSE label END, \
             price = CASE WHEN (train=@key0_0 AND seat_no=@key1_0) THEN @set1_0 \
             WHEN (train=@key0_1 AND seat_no=@key1_1) THEN @set1_1 ELSE price END \
             WHERE (train=@wkey0_0 AND seat_no=@wkey1_0) OR (train=@wkey0_1 AND seat_no=@wkey1_1)"
        );
    }

    #[test]
    fn test_delete() {
        assert_eq!(
            build_delete(Dialect::SqlServer, "Seats", &["train", "seat_no"], key_param_name),
            "DELETE FROM [Seats] WHERE train=@key0 AND seat_no=@key1"
        );
    }

    #[test]
    fn test_bulk_delete() {
        assert_eq!(
            build_bulk_delete(Dialect::SqlServer, "Stations", &["id"], 3, bulk_key_param_name),
            "DELETE FROM [Stations] WHERE (id=@key0_0) OR (id=@key0_1) OR (id=@key0_2)"
        );
    }

    #[test]
    fn test_select_all() {
        assert_eq!(
            build_select_all(Dialect::Postgres, "Stations", &["id", "name"]),
            "SELECT id,name FROM \"Stations\""
        );
    }

    #[test]
    fn test_custom_namer() {
        let sql = build_insert(Dialect::SqlServer, "T", &["a", "b"], &[], |i| format!("v{}", i + 1));
        assert_eq!(sql, "INSERT INTO [T] (a,b) VALUES (@v1,@v2)");
    }
}
