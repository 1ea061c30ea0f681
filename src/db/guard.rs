//! Statement check applied to every repository query. The registry and
//! session tables are the only ones the gate may touch, and nothing it
//! issues may change schema or remove rows.

use thiserror::Error;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "CREATE", "ALTER", "DROP", "TRUNCATE", "DELETE", "GRANT", "REVOKE", "ATTACH", "DETACH",
    "PRAGMA", "VACUUM",
];

const ALLOWED_TABLES: &[&str] = &["VEHICLES", "PARKING_SESSIONS"];

/// Keywords followed by a table name.
const TABLE_POSITIONS: &[&str] = &["FROM", "INTO", "UPDATE", "JOIN"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryRejected {
    #[error("statement uses forbidden keyword {0}")]
    ForbiddenKeyword(String),
    #[error("statement references table {0} outside the allow-list")]
    UnknownTable(String),
    #[error("statement references no table")]
    NoTable,
}

/// Returns `sql` unchanged when it passes the guard.
pub fn checked(sql: &str) -> Result<&str, QueryRejected> {
    let tokens: Vec<String> = sql
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_uppercase())
        .collect();

    if let Some(keyword) = tokens
        .iter()
        .find(|t| FORBIDDEN_KEYWORDS.contains(&t.as_str()))
    {
        return Err(QueryRejected::ForbiddenKeyword(keyword.clone()));
    }

    let mut tables = 0;
    for pair in tokens.windows(2) {
        if !TABLE_POSITIONS.contains(&pair[0].as_str()) {
            continue;
        }
        // `ON CONFLICT .. DO UPDATE SET` names no table.
        if pair[0] == "UPDATE" && pair[1] == "SET" {
            continue;
        }
        if !ALLOWED_TABLES.contains(&pair[1].as_str()) {
            return Err(QueryRejected::UnknownTable(pair[1].to_ascii_lowercase()));
        }
        tables += 1;
    }

    if tables == 0 {
        return Err(QueryRejected::NoTable);
    }
    Ok(sql)
}
