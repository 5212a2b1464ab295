use std::fmt;

/// Target SQL engine profile.
///
/// A dialect answers three questions for the rest of the core: how to quote
/// identifiers, how to quote string literals, and which materializations its
/// DDL can express. Everything dialect-specific funnels through here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Postgres and close relatives.
    Postgres,
    /// Google BigQuery (standard SQL).
    BigQuery,
    /// Athena/Presto family.
    Athena,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::BigQuery => "bigquery",
            Dialect::Athena => "athena",
        }
    }

    /// Maximum length of a generated object name.
    ///
    /// Real database limits; generated names are truncated to fit before the
    /// hash suffix is appended.
    pub fn max_identifier_length(&self) -> usize {
        match self {
            Dialect::Postgres | Dialect::Athena => 63,
            Dialect::BigQuery => 1023,
        }
    }

    /// Quote a column/table/alias identifier.
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Athena => {
                format!("\"{}\"", name.replace('"', "\"\""))
            }
            Dialect::BigQuery => {
                format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
            }
        }
    }

    /// Quote and escape a string literal.
    pub fn quote_string(&self, value: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Athena => {
                format!("'{}'", value.replace('\'', "''"))
            }
            Dialect::BigQuery => {
                format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
            }
        }
    }

    /// Whether the dialect has a temp-table construct at all.
    pub fn supports_temp_tables(&self) -> bool {
        match self {
            Dialect::Postgres | Dialect::BigQuery => true,
            Dialect::Athena => false,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
