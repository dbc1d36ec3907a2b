use crate::error::{HeySaveError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// ROW TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Expense,
    Income,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Expense => "Expense",
            TransactionKind::Income => "Income",
        }
    }

    pub fn parse(value: &str) -> Option<TransactionKind> {
        match value {
            "Expense" => Some(TransactionKind::Expense),
            "Income" => Some(TransactionKind::Income),
            _ => None,
        }
    }
}

/// User row. Balance and points are not clamped at the data layer.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip)]
    pub password: String,
    pub display_name: String,
    pub national_id: String,
    pub bank: String,
    pub balance: f64,
    /// Funds withdrawn from completed goals; never earns points
    pub goals_balance: f64,
    pub points: i64,
    #[serde(skip)]
    pub photo: Option<Vec<u8>>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
}

pub struct NewUser<'a> {
    pub username: &'a str,
    /// Already hashed by the caller
    pub password: &'a str,
    pub display_name: &'a str,
    pub national_id: &'a str,
    pub bank: &'a str,
    pub country: Option<&'a str>,
    pub address: Option<&'a str>,
    pub postal_code: Option<&'a str>,
}

/// Append-only history entry. `amount` is stored positive; `kind` carries the sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub date: String,
    pub description: String,
    pub category: String,
    pub amount: f64,
    pub kind: TransactionKind,
}

impl Transaction {
    pub fn signed_amount(&self) -> f64 {
        match self.kind {
            TransactionKind::Expense => -self.amount,
            TransactionKind::Income => self.amount,
        }
    }
}

pub struct NewTransaction<'a> {
    pub user_id: i64,
    pub description: &'a str,
    pub category: &'a str,
    pub amount: f64,
    pub kind: TransactionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub target: f64,
    pub saved: f64,
}

impl Goal {
    /// Fraction of the target reached, capped at 1.0
    pub fn progress(&self) -> f64 {
        if self.target <= 0.0 {
            return 1.0;
        }
        (self.saved / self.target).min(1.0)
    }

    pub fn remaining(&self) -> f64 {
        (self.target - self.saved).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemedReward {
    pub id: i64,
    pub user_id: i64,
    pub reward: String,
    pub code: String,
    pub date: String,
}

/// Audit trail entry. `actor` is the username of the session that caused it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: impl ToString,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Event {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Today's date as stored in `transactions.date` and `redeemed_rewards.date`
pub fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Optional `users` columns added after the first release
const USER_MIGRATIONS: &[(&str, &str)] = &[
    ("goals_balance", "REAL DEFAULT 0"),
    ("photo", "BLOB"),
    ("country", "TEXT"),
    ("address", "TEXT"),
    ("postal_code", "TEXT"),
];

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    info!(path = %path.display(), "database ready");
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password TEXT NOT NULL,
            display_name TEXT NOT NULL,
            national_id TEXT NOT NULL,
            bank TEXT NOT NULL,
            balance REAL DEFAULT 0,
            goals_balance REAL DEFAULT 0,
            points INTEGER DEFAULT 0,
            photo BLOB,
            country TEXT,
            address TEXT,
            postal_code TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            amount REAL NOT NULL,
            kind TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS goals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            target REAL NOT NULL,
            saved REAL DEFAULT 0,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS redeemed_rewards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            reward TEXT NOT NULL,
            code TEXT NOT NULL,
            date TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_actor ON events(actor)",
        [],
    )?;

    migrate_add_columns(conn)?;

    Ok(())
}

/// Add any missing optional `users` columns. Existing rows keep their data
/// and read the column default. Returns the number of columns added.
pub fn migrate_add_columns(conn: &Connection) -> Result<usize> {
    let mut stmt = conn.prepare("PRAGMA table_info(users)")?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut added = 0;
    for (column, definition) in USER_MIGRATIONS {
        if existing.iter().any(|c| c == column) {
            continue;
        }
        conn.execute(
            &format!("ALTER TABLE users ADD COLUMN {} {}", column, definition),
            [],
        )?;
        added += 1;
    }

    if added > 0 {
        info!(added, "migrated users table");
    }
    Ok(added)
}

// ============================================================================
// USERS
// ============================================================================

const USER_COLUMNS: &str = "id, username, password, display_name, national_id, bank,
    balance, goals_balance, points, photo, country, address, postal_code";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        display_name: row.get(3)?,
        national_id: row.get(4)?,
        bank: row.get(5)?,
        balance: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
        goals_balance: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
        points: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
        photo: row.get(9)?,
        country: row.get(10)?,
        address: row.get(11)?,
        postal_code: row.get(12)?,
    })
}

pub fn insert_user(conn: &Connection, user: &NewUser) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (
            username, password, display_name, national_id, bank, country, address, postal_code
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user.username,
            user.password,
            user.display_name,
            user.national_id,
            user.bank,
            user.country,
            user.address,
            user.postal_code,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_user(conn: &Connection, user_id: i64) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![user_id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user(conn: &Connection, user_id: i64) -> Result<User> {
    find_user(conn, user_id)?.ok_or_else(|| HeySaveError::not_found("User", user_id))
}

pub fn find_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
            params![username],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn username_exists(conn: &Connection, username: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Add signed deltas to balance and points in one statement
pub fn adjust_balance_and_points(
    conn: &Connection,
    user_id: i64,
    balance_delta: f64,
    points_delta: i64,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE users SET balance = balance + ?1, points = points + ?2 WHERE id = ?3",
        params![balance_delta, points_delta, user_id],
    )?;
    ensure_changed(changed, "User", user_id)
}

pub fn adjust_goals_balance(conn: &Connection, user_id: i64, delta: f64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE users SET goals_balance = COALESCE(goals_balance, 0) + ?1 WHERE id = ?2",
        params![delta, user_id],
    )?;
    ensure_changed(changed, "User", user_id)
}

pub fn set_photo(conn: &Connection, user_id: i64, photo: Option<&[u8]>) -> Result<()> {
    let changed = conn.execute(
        "UPDATE users SET photo = ?1 WHERE id = ?2",
        params![photo, user_id],
    )?;
    ensure_changed(changed, "User", user_id)
}

fn ensure_changed(changed: usize, entity: &'static str, id: i64) -> Result<()> {
    if changed == 0 {
        Err(HeySaveError::not_found(entity, id))
    } else {
        Ok(())
    }
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let kind: String = row.get(6)?;
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        amount: row.get(5)?,
        kind: TransactionKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                Type::Text,
                format!("unknown transaction kind: {}", kind).into(),
            )
        })?,
    })
}

pub fn insert_transaction(conn: &Connection, tx: &NewTransaction) -> Result<i64> {
    conn.execute(
        "INSERT INTO transactions (user_id, date, description, category, amount, kind)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            tx.user_id,
            today(),
            tx.description,
            tx.category,
            tx.amount,
            tx.kind.as_str(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most-recent-first; `limit` of None returns the whole history
pub fn get_transactions(
    conn: &Connection,
    user_id: i64,
    limit: Option<usize>,
) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, date, description, category, amount, kind
         FROM transactions
         WHERE user_id = ?1
         ORDER BY id DESC
         LIMIT ?2",
    )?;

    // SQLite treats a negative LIMIT as unbounded
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let transactions = stmt
        .query_map(params![user_id, limit], transaction_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    debug!(user_id, count = transactions.len(), "loaded transactions");
    Ok(transactions)
}

/// Distinct categories of every expense the user has recorded
pub fn expense_categories(conn: &Connection, user_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT category FROM transactions
         WHERE user_id = ?1 AND kind = ?2
         ORDER BY category",
    )?;
    let categories = stmt
        .query_map(
            params![user_id, TransactionKind::Expense.as_str()],
            |row| row.get(0),
        )?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(categories)
}

pub fn count_transactions(conn: &Connection, user_id: i64) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// GOALS
// ============================================================================

fn goal_from_row(row: &Row) -> rusqlite::Result<Goal> {
    Ok(Goal {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        target: row.get(3)?,
        saved: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
    })
}

pub fn insert_goal(conn: &Connection, user_id: i64, name: &str, target: f64) -> Result<i64> {
    conn.execute(
        "INSERT INTO goals (user_id, name, target) VALUES (?1, ?2, ?3)",
        params![user_id, name, target],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Goal owned by `user_id`; another user's goal reads as absent
pub fn find_goal(conn: &Connection, user_id: i64, goal_id: i64) -> Result<Option<Goal>> {
    let goal = conn
        .query_row(
            "SELECT id, user_id, name, target, saved FROM goals WHERE id = ?1 AND user_id = ?2",
            params![goal_id, user_id],
            goal_from_row,
        )
        .optional()?;
    Ok(goal)
}

pub fn get_goals(conn: &Connection, user_id: i64) -> Result<Vec<Goal>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, target, saved FROM goals WHERE user_id = ?1 ORDER BY id",
    )?;
    let goals = stmt
        .query_map(params![user_id], goal_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(goals)
}

pub fn add_to_goal(conn: &Connection, goal_id: i64, amount: f64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE goals SET saved = COALESCE(saved, 0) + ?1 WHERE id = ?2",
        params![amount, goal_id],
    )?;
    ensure_changed(changed, "Goal", goal_id)
}

pub fn reset_goal(conn: &Connection, goal_id: i64) -> Result<()> {
    let changed = conn.execute("UPDATE goals SET saved = 0 WHERE id = ?1", params![goal_id])?;
    ensure_changed(changed, "Goal", goal_id)
}

// ============================================================================
// REDEEMED REWARDS
// ============================================================================

pub fn insert_redeemed_reward(
    conn: &Connection,
    user_id: i64,
    reward: &str,
    code: &str,
) -> Result<RedeemedReward> {
    let date = today();
    conn.execute(
        "INSERT INTO redeemed_rewards (user_id, reward, code, date) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, reward, code, date],
    )?;
    Ok(RedeemedReward {
        id: conn.last_insert_rowid(),
        user_id,
        reward: reward.to_string(),
        code: code.to_string(),
        date,
    })
}

/// Most-recent-first
pub fn get_redeemed_rewards(conn: &Connection, user_id: i64) -> Result<Vec<RedeemedReward>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, reward, code, date FROM redeemed_rewards
         WHERE user_id = ?1 ORDER BY id DESC",
    )?;
    let rewards = stmt
        .query_map(params![user_id], |row| {
            Ok(RedeemedReward {
                id: row.get(0)?,
                user_id: row.get(1)?,
                reward: row.get(2)?,
                code: row.get(3)?,
                date: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rewards)
}

// ============================================================================
// EVENTS
// ============================================================================

const EVENT_COLUMNS: &str = "event_id, timestamp, event_type, entity_type, entity_id, data, actor";

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn event_from_row(row: &Row) -> rusqlite::Result<Event> {
    let timestamp: String = row.get(1)?;
    let data: String = row.get(5)?;

    Ok(Event {
        event_id: row.get(0)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(1, e))?,
        event_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        data: serde_json::from_str(&data).map_err(|e| conversion_error(5, e))?,
        actor: row.get(6)?,
    })
}

/// Append to the audit trail. Runs inside the caller's SQLite transaction
/// when given one, so the event commits or rolls back with the mutation.
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO events ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)", EVENT_COLUMNS),
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            event.data.to_string(),
            event.actor,
        ],
    )?;
    debug!(event_type = %event.event_type, entity_id = %event.entity_id, "audit event");
    Ok(())
}

/// Events about one user, goal or transaction, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM events WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY id DESC",
        EVENT_COLUMNS
    ))?;
    let events = stmt
        .query_map(params![entity_type, entity_id], event_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(events)
}

/// Latest events a user caused, across every entity they touched
pub fn get_activity(conn: &Connection, actor: &str, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM events WHERE actor = ?1 ORDER BY id DESC LIMIT ?2",
        EVENT_COLUMNS
    ))?;
    let events = stmt
        .query_map(params![actor, limit as i64], event_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(events)
}
