// Database module - SQLite connection, user store, portfolio store

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::portfolio::{Holding, Portfolio};

/// A registered user. The password hash never leaves this layer and the
/// auth module.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Get the default database path (~/.cryptofolio/data.db)
pub fn default_db_path() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| Error::Db("HOME environment variable not set".to_string()))?;
    let data_dir = PathBuf::from(home).join(".cryptofolio");

    std::fs::create_dir_all(&data_dir)
        .map_err(|e| Error::Db(format!("failed to create data directory: {}", e)))?;

    Ok(data_dir.join("data.db"))
}

/// Open database connection
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = match db_path {
        Some(p) => p,
        None => default_db_path()?,
    };
    let conn = Connection::open(&path)
        .map_err(|e| Error::Db(format!("failed to open database at {:?}: {}", path, e)))?;

    // Enable foreign keys
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    Ok(conn)
}

/// Initialize the database with schema
///
/// Creates the database file and runs the schema SQL to set up all tables
/// and indexes. Safe to run repeatedly.
pub fn init_database(db_path: Option<PathBuf>) -> Result<()> {
    let path = match db_path {
        Some(p) => p,
        None => default_db_path()?,
    };

    info!("Initializing database at: {:?}", path);

    let conn = open_db(Some(path))?;

    let schema_sql = include_str!("schema.sql");
    conn.execute_batch(schema_sql)
        .map_err(|e| Error::Db(format!("failed to execute schema: {}", e)))?;

    info!("Database initialized successfully");
    Ok(())
}

/// Insert a new user. The email must be unique.
pub fn create_user(
    conn: &Connection,
    email: &str,
    username: &str,
    password_hash: &str,
) -> Result<User> {
    let existing: Option<String> = conn
        .prepare("SELECT id FROM users WHERE email = ?1")?
        .query_row([email], |row| row.get(0))
        .optional()?;

    if existing.is_some() {
        return Err(Error::Conflict("user already exists".to_string()));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        created_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO users (id, email, username, password_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user.id,
            user.email,
            user.username,
            user.password_hash,
            user.created_at,
        ],
    )?;

    Ok(user)
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let user = conn
        .prepare(
            "SELECT id, email, username, password_hash, created_at
             FROM users WHERE email = ?1",
        )?
        .query_row([email], row_to_user)
        .optional()?;
    Ok(user)
}

pub fn find_user_by_id(conn: &Connection, user_id: &str) -> Result<Option<User>> {
    let user = conn
        .prepare(
            "SELECT id, email, username, password_hash, created_at
             FROM users WHERE id = ?1",
        )?
        .query_row([user_id], row_to_user)
        .optional()?;
    Ok(user)
}

/// Update a user's email and/or username. Changing the email fails with
/// `Conflict` when another account already uses it.
pub fn update_user(
    conn: &Connection,
    user_id: &str,
    email: Option<&str>,
    username: Option<&str>,
) -> Result<User> {
    let mut user = find_user_by_id(conn, user_id)?
        .ok_or_else(|| Error::not_found(format!("user {}", user_id)))?;

    if let Some(email) = email {
        if email != user.email {
            let taken: Option<String> = conn
                .prepare("SELECT id FROM users WHERE email = ?1 AND id != ?2")?
                .query_row(params![email, user_id], |row| row.get(0))
                .optional()?;
            if taken.is_some() {
                return Err(Error::Conflict("email already in use".to_string()));
            }
            user.email = email.to_string();
        }
    }
    if let Some(username) = username {
        user.username = username.to_string();
    }

    conn.execute(
        "UPDATE users SET email = ?2, username = ?3 WHERE id = ?1",
        params![user.id, user.email, user.username],
    )?;

    Ok(user)
}

/// Replace a user's password hash.
pub fn update_password_hash(conn: &Connection, user_id: &str, password_hash: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE users SET password_hash = ?2 WHERE id = ?1",
        params![user_id, password_hash],
    )?;
    if changed == 0 {
        return Err(Error::not_found(format!("user {}", user_id)));
    }
    Ok(())
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Load a portfolio (with holdings in insertion order) by owner.
pub fn get_portfolio_by_owner(conn: &Connection, owner_id: &str) -> Result<Option<Portfolio>> {
    let portfolio = conn
        .prepare(
            "SELECT id, owner_id, display_name, total_cost_basis, created_at, updated_at
             FROM portfolios WHERE owner_id = ?1",
        )?
        .query_row([owner_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, DateTime<Utc>>(4)?,
                row.get::<_, DateTime<Utc>>(5)?,
            ))
        })
        .optional()?;

    let Some((id, owner_id, display_name, total_cost_basis, created_at, updated_at)) = portfolio
    else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT id, asset_id, name, symbol, amount, unit_cost, acquired_at, note
         FROM holdings
         WHERE portfolio_id = ?1
         ORDER BY position ASC",
    )?;
    let holdings = stmt
        .query_map([&id], |row| {
            Ok(Holding {
                id: row.get(0)?,
                asset_id: row.get(1)?,
                name: row.get(2)?,
                symbol: row.get(3)?,
                amount: get_decimal_value(row, 4)?,
                unit_cost: get_decimal_value(row, 5)?,
                acquired_at: row.get(6)?,
                note: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(Portfolio {
        id,
        owner_id,
        display_name,
        holdings,
        total_cost_basis: parse_decimal(&total_cost_basis)?,
        created_at,
        updated_at,
    }))
}

/// Create and persist an empty portfolio for an owner.
pub fn create_portfolio(
    conn: &Connection,
    owner_id: &str,
    display_name: &str,
) -> Result<Portfolio> {
    let portfolio = Portfolio::new(owner_id, display_name);

    conn.execute(
        "INSERT INTO portfolios (id, owner_id, display_name, total_cost_basis, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            portfolio.id,
            portfolio.owner_id,
            portfolio.display_name,
            portfolio.total_cost_basis.to_string(),
            portfolio.created_at,
            portfolio.updated_at,
        ],
    )?;

    debug!("Created portfolio {} for owner {}", portfolio.id, owner_id);
    Ok(portfolio)
}

/// Load the owner's portfolio, lazily creating an empty one on first access.
pub fn get_or_create_portfolio(conn: &Connection, owner_id: &str) -> Result<Portfolio> {
    if let Some(portfolio) = get_portfolio_by_owner(conn, owner_id)? {
        return Ok(portfolio);
    }
    create_portfolio(conn, owner_id, crate::portfolio::DEFAULT_PORTFOLIO_NAME)
}

/// Persist a mutated portfolio: the row is updated and its holdings are
/// rewritten inside one transaction.
///
/// `expected_updated_at` is the timestamp the caller loaded; if the stored
/// row has moved on since then, a concurrent writer got there first and the
/// save fails with `Conflict` so the caller can re-fetch and retry.
pub fn save_portfolio(
    conn: &mut Connection,
    portfolio: &Portfolio,
    expected_updated_at: DateTime<Utc>,
) -> Result<()> {
    let tx = conn.transaction()?;

    let stored: Option<DateTime<Utc>> = tx
        .prepare("SELECT updated_at FROM portfolios WHERE id = ?1")?
        .query_row([&portfolio.id], |row| row.get(0))
        .optional()?;

    match stored {
        None => {
            return Err(Error::not_found(format!("portfolio {}", portfolio.id)));
        }
        Some(stored) if stored != expected_updated_at => {
            return Err(Error::Conflict(
                "portfolio was modified concurrently".to_string(),
            ));
        }
        Some(_) => {}
    }

    tx.execute(
        "UPDATE portfolios
         SET display_name = ?2, total_cost_basis = ?3, updated_at = ?4
         WHERE id = ?1",
        params![
            portfolio.id,
            portfolio.display_name,
            portfolio.total_cost_basis.to_string(),
            portfolio.updated_at,
        ],
    )?;

    tx.execute(
        "DELETE FROM holdings WHERE portfolio_id = ?1",
        [&portfolio.id],
    )?;

    for (position, holding) in portfolio.holdings.iter().enumerate() {
        tx.execute(
            "INSERT INTO holdings (
                id, portfolio_id, position, asset_id, name, symbol,
                amount, unit_cost, acquired_at, note
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                holding.id,
                portfolio.id,
                position as i64,
                holding.asset_id,
                holding.name,
                holding.symbol,
                holding.amount.to_string(),
                holding.unit_cost.to_string(),
                holding.acquired_at,
                holding.note,
            ],
        )?;
    }

    tx.commit()?;
    Ok(())
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| Error::Db(format!("invalid decimal '{}': {}", s, e)))
}

/// Helper to read Decimal from a TEXT column
fn get_decimal_value(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Decimal> {
    let s: String = row.get(idx)?;
    Decimal::from_str(&s).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::NewHolding;
    use rust_decimal_macros::dec;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        conn.execute_batch(include_str!("schema.sql")).unwrap();
        conn
    }

    fn test_user(conn: &Connection) -> User {
        create_user(conn, "alice@example.com", "alice", "hash").unwrap()
    }

    #[test]
    fn test_create_user_rejects_duplicate_email() {
        let conn = test_conn();
        test_user(&conn);

        let err = create_user(&conn, "alice@example.com", "alice2", "hash2").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_find_user_round_trip() {
        let conn = test_conn();
        let user = test_user(&conn);

        let by_email = find_user_by_email(&conn, "alice@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, user.id);
        assert_eq!(by_email.password_hash, "hash");

        let by_id = find_user_by_id(&conn, &user.id).unwrap().unwrap();
        assert_eq!(by_id.email, "alice@example.com");

        assert!(find_user_by_email(&conn, "bob@example.com")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_user_changes_only_supplied_fields() {
        let conn = test_conn();
        let user = test_user(&conn);

        let updated = update_user(&conn, &user.id, None, Some("alice2")).unwrap();
        assert_eq!(updated.email, "alice@example.com");
        assert_eq!(updated.username, "alice2");

        let stored = find_user_by_id(&conn, &user.id).unwrap().unwrap();
        assert_eq!(stored.username, "alice2");
    }

    #[test]
    fn test_update_user_rejects_taken_email() {
        let conn = test_conn();
        let alice = test_user(&conn);
        create_user(&conn, "bob@example.com", "bob", "hash").unwrap();

        let err = update_user(&conn, &alice.id, Some("bob@example.com"), None).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Re-submitting the current email is a no-op, not a conflict
        let same = update_user(&conn, &alice.id, Some("alice@example.com"), None).unwrap();
        assert_eq!(same.email, "alice@example.com");
    }

    #[test]
    fn test_update_password_hash_round_trip() {
        let conn = test_conn();
        let user = test_user(&conn);

        update_password_hash(&conn, &user.id, "new-hash").unwrap();
        let stored = find_user_by_id(&conn, &user.id).unwrap().unwrap();
        assert_eq!(stored.password_hash, "new-hash");

        let err = update_password_hash(&conn, "ghost", "hash").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_get_or_create_portfolio_is_lazy_and_stable() {
        let conn = test_conn();
        let user = test_user(&conn);

        assert!(get_portfolio_by_owner(&conn, &user.id).unwrap().is_none());

        let first = get_or_create_portfolio(&conn, &user.id).unwrap();
        assert_eq!(first.display_name, "My Portfolio");
        assert!(first.holdings.is_empty());

        // Second access returns the same portfolio, not a new one
        let second = get_or_create_portfolio(&conn, &user.id).unwrap();
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn test_save_and_reload_preserves_holdings_and_order() {
        let mut conn = test_conn();
        let user = test_user(&conn);
        let mut portfolio = get_or_create_portfolio(&conn, &user.id).unwrap();
        let loaded_at = portfolio.updated_at;

        for (asset_id, symbol, amount, unit_cost) in [
            ("1", "BTC", dec!(0.5), dec!(40000)),
            ("1027", "ETH", dec!(10), dec!(2500.55)),
            ("5426", "SOL", dec!(100), dec!(95)),
        ] {
            portfolio
                .add_holding(NewHolding {
                    asset_id: asset_id.to_string(),
                    name: symbol.to_string(),
                    symbol: symbol.to_string(),
                    amount,
                    unit_cost,
                    acquired_at: None,
                    note: None,
                })
                .unwrap();
        }

        save_portfolio(&mut conn, &portfolio, loaded_at).unwrap();

        let reloaded = get_portfolio_by_owner(&conn, &user.id).unwrap().unwrap();
        assert_eq!(reloaded.holdings.len(), 3);
        let symbols: Vec<_> = reloaded.holdings.iter().map(|h| h.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTC", "ETH", "SOL"]);
        assert_eq!(reloaded.holdings[1].unit_cost, dec!(2500.55));
        assert_eq!(reloaded.total_cost_basis, portfolio.total_cost_basis);
        assert_eq!(reloaded.total_cost_basis, reloaded.compute_cost_basis());
    }

    #[test]
    fn test_stale_save_is_a_conflict() {
        let mut conn = test_conn();
        let user = test_user(&conn);
        let portfolio = get_or_create_portfolio(&conn, &user.id).unwrap();
        let loaded_at = portfolio.updated_at;

        // First writer wins
        let mut first = portfolio.clone();
        first.rename("Writer one").unwrap();
        save_portfolio(&mut conn, &first, loaded_at).unwrap();

        // Second writer saved against the stale copy
        let mut second = portfolio;
        second.rename("Writer two").unwrap();
        let err = save_portfolio(&mut conn, &second, loaded_at).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let stored = get_portfolio_by_owner(&conn, &user.id).unwrap().unwrap();
        assert_eq!(stored.display_name, "Writer one");
    }

    #[test]
    fn test_save_unknown_portfolio_is_not_found() {
        let mut conn = test_conn();
        test_user(&conn);

        let portfolio = Portfolio::new("ghost", "Nobody's");
        let err = save_portfolio(&mut conn, &portfolio, portfolio.updated_at).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
