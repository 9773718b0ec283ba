//! Supported SQL dialects and their syntactic differences.

use crate::error::Error;
use crate::reference::REF_COLUMN_LEN;
use std::fmt;
use std::str::FromStr;

/// Name of the database-level type used for reference columns on dialects
/// that support domains/user types (Postgres, MSSQL).
pub const REF_DOMAIN_NAME: &str = "entorm_ref_type";

/// One of the four supported SQL backends.
///
/// The dialect governs literal rendering, column types, catalog
/// introspection, index-drop syntax, and pagination syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Mssql,
    Mysql,
    Sqlite,
}

impl Dialect {
    /// Render a boolean literal for this dialect.
    #[must_use]
    pub const fn bool_literal(&self, value: bool) -> &'static str {
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                if value {
                    "TRUE"
                } else {
                    "FALSE"
                }
            }
            Dialect::Mssql | Dialect::Mysql => {
                if value {
                    "1"
                } else {
                    "0"
                }
            }
        }
    }

    /// SQL type used for reference columns.
    ///
    /// Postgres and MSSQL use a named domain/user type (created once by the
    /// schema reconciler); MySQL and SQLite use a fixed-length varchar.
    #[must_use]
    pub fn ref_column_type(&self) -> String {
        match self {
            Dialect::Postgres | Dialect::Mssql => REF_DOMAIN_NAME.to_string(),
            Dialect::Mysql | Dialect::Sqlite => format!("varchar({})", REF_COLUMN_LEN),
        }
    }

    /// Render the pagination clause for a 1-based page number.
    ///
    /// Only legal when the query carries an ORDER BY; the caller enforces
    /// that invariant.
    #[must_use]
    pub fn pagination_clause(&self, page_no: u64, page_size: u64) -> String {
        let offset = (page_no - 1) * page_size;
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                format!(" limit {page_size} offset {offset}")
            }
            Dialect::Mysql => format!(" limit {offset}, {page_size}"),
            Dialect::Mssql => {
                format!(" offset {offset} rows fetch next {page_size} rows only")
            }
        }
    }

    /// Render the DROP INDEX statement for this dialect.
    #[must_use]
    pub fn drop_index_sql(&self, index: &str, table: &str) -> String {
        match self {
            Dialect::Mssql | Dialect::Mysql => format!("drop index {index} on {table}"),
            Dialect::Postgres | Dialect::Sqlite => format!("drop index {index}"),
        }
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(Dialect::Postgres),
            "mssql" => Ok(Dialect::Mssql),
            "mysql" => Ok(Dialect::Mysql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(Error::UnsupportedDialect(other.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Postgres => "postgres",
            Dialect::Mssql => "mssql",
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_dialects() {
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("mssql".parse::<Dialect>().unwrap(), Dialect::Mssql);
        assert_eq!("mysql".parse::<Dialect>().unwrap(), Dialect::Mysql);
        assert_eq!("sqlite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!("sqlite3".parse::<Dialect>().unwrap(), Dialect::Sqlite);
    }

    #[test]
    fn test_parse_unknown_dialect_fails() {
        let err = "oracle".parse::<Dialect>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedDialect(ref s) if s == "oracle"));
    }

    #[test]
    fn test_bool_literal_per_dialect() {
        assert_eq!(Dialect::Postgres.bool_literal(true), "TRUE");
        assert_eq!(Dialect::Sqlite.bool_literal(false), "FALSE");
        assert_eq!(Dialect::Mssql.bool_literal(true), "1");
        assert_eq!(Dialect::Mysql.bool_literal(false), "0");
    }

    #[test]
    fn test_pagination_clause_per_dialect() {
        assert_eq!(
            Dialect::Sqlite.pagination_clause(2, 10),
            " limit 10 offset 10"
        );
        assert_eq!(Dialect::Mysql.pagination_clause(3, 5), " limit 10, 5");
        assert_eq!(
            Dialect::Mssql.pagination_clause(1, 20),
            " offset 0 rows fetch next 20 rows only"
        );
    }

    #[test]
    fn test_drop_index_sql() {
        assert_eq!(
            Dialect::Mysql.drop_index_sql("t_idx_by_a", "t"),
            "drop index t_idx_by_a on t"
        );
        assert_eq!(
            Dialect::Postgres.drop_index_sql("t_idx_by_a", "t"),
            "drop index t_idx_by_a"
        );
    }
}
