use std::fmt::{Display, Formatter, Result as FmtResult};

/// Broad category of a SQL statement.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SqlType {
    /// Schema changes: `CREATE`, `ALTER`, `DROP`.
    Migration,

    /// Anything that writes data.
    Mutation,

    /// Row-returning reads.
    Query,
}

impl SqlType {
    /// Classifies a statement by its leading keyword.
    #[must_use]
    pub fn classify(sql: &str) -> Self {
        let sql = sql.trim_start().to_uppercase();

        if sql.starts_with("SELECT") {
            Self::Query
        } else if sql.starts_with("CREATE") || sql.starts_with("ALTER") || sql.starts_with("DROP")
        {
            Self::Migration
        } else {
            Self::Mutation
        }
    }
}

impl Display for SqlType {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::Migration => write!(f, "Migration"),
            Self::Mutation => write!(f, "Mutation"),
            Self::Query => write!(f, "Query"),
        }
    }
}
