// 📒 Account Ledger - balance, points and transaction history
//
// Every mutating operation validates first, applies all of its statements
// inside one SQLite transaction, and answers with a fresh snapshot of the
// account for the presentation layer to render.

use crate::auth::Session;
use crate::db::{self, Event, Goal, NewTransaction, RedeemedReward, Transaction, TransactionKind};
use crate::error::{HeySaveError, Result, Violations};
use crate::loyalty::{self, Reward, TierInfo};
use crate::rules::{detect_category, Category};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

/// Transactions included in a snapshot
pub const RECENT_LIMIT: usize = 10;

pub const MSG_AMOUNT_POSITIVE: &str = "Amount must be greater than zero.";
pub const MSG_DESCRIPTION_REQUIRED: &str = "Description is required.";

#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub bank: String,
    pub balance: f64,
    pub goals_balance: f64,
    pub points: i64,
    pub tier: TierInfo,
    /// Most-recent-first
    pub recent_transactions: Vec<Transaction>,
    pub goals: Vec<Goal>,
}

/// Re-read everything the dashboard shows
pub fn snapshot(conn: &Connection, user_id: i64) -> Result<AccountSnapshot> {
    let user = db::get_user(conn, user_id)?;

    Ok(AccountSnapshot {
        user_id: user.id,
        tier: loyalty::compute_tier(user.points),
        recent_transactions: db::get_transactions(conn, user_id, Some(RECENT_LIMIT))?,
        goals: db::get_goals(conn, user_id)?,
        username: user.username,
        display_name: user.display_name,
        bank: user.bank,
        balance: user.balance,
        goals_balance: user.goals_balance,
        points: user.points,
    })
}

pub(crate) fn validate_amount(amount: f64, violations: &mut Violations) {
    violations.check(amount.is_finite() && amount > 0.0, MSG_AMOUNT_POSITIVE);
}

fn validate_entry(description: &str, amount: f64) -> Result<()> {
    let mut violations = Violations::new();
    violations.check(!description.trim().is_empty(), MSG_DESCRIPTION_REQUIRED);
    validate_amount(amount, &mut violations);
    violations.into_result()
}

/// Spend from the primary balance. The category comes from the description.
pub fn record_expense(
    conn: &Connection,
    session: &Session,
    description: &str,
    amount: f64,
) -> Result<AccountSnapshot> {
    let user_id = session.require_user()?;
    validate_entry(description, amount)?;
    let description = description.trim();

    let tx = conn.unchecked_transaction()?;
    let user = db::get_user(&tx, user_id)?;
    if amount > user.balance {
        warn!(user_id, amount, balance = user.balance, "expense rejected: insufficient funds");
        return Err(HeySaveError::InsufficientFunds {
            needed: amount,
            available: user.balance,
        });
    }

    let category = detect_category(description);
    db::adjust_balance_and_points(&tx, user_id, -amount, 0)?;
    let tx_id = db::insert_transaction(
        &tx,
        &NewTransaction {
            user_id,
            description,
            category: category.as_str(),
            amount,
            kind: TransactionKind::Expense,
        },
    )?;
    db::insert_event(
        &tx,
        &Event::new(
            "expense_recorded",
            "transaction",
            tx_id,
            serde_json::json!({ "amount": amount, "category": category.as_str() }),
            session.actor(),
        ),
    )?;
    tx.commit()?;

    info!(user_id, amount, category = %category, "expense recorded");
    snapshot(conn, user_id)
}

pub fn record_income(
    conn: &Connection,
    session: &Session,
    description: &str,
    amount: f64,
) -> Result<AccountSnapshot> {
    let user_id = session.require_user()?;
    validate_entry(description, amount)?;

    let tx = conn.unchecked_transaction()?;
    db::adjust_balance_and_points(&tx, user_id, amount, 0)?;
    let tx_id = db::insert_transaction(
        &tx,
        &NewTransaction {
            user_id,
            description: description.trim(),
            category: Category::Income.as_str(),
            amount,
            kind: TransactionKind::Income,
        },
    )?;
    db::insert_event(
        &tx,
        &Event::new(
            "income_recorded",
            "transaction",
            tx_id,
            serde_json::json!({ "amount": amount }),
            session.actor(),
        ),
    )?;
    tx.commit()?;

    info!(user_id, amount, "income recorded");
    snapshot(conn, user_id)
}

#[derive(Debug, Clone, Serialize)]
pub struct Redemption {
    pub reward: RedeemedReward,
    pub snapshot: AccountSnapshot,
}

/// Spend points on a reward; the redemption row carries a generated code
pub fn redeem_reward(conn: &Connection, session: &Session, reward: &Reward) -> Result<Redemption> {
    let user_id = session.require_user()?;

    let tx = conn.unchecked_transaction()?;
    let user = db::get_user(&tx, user_id)?;
    if user.points < reward.cost {
        warn!(user_id, reward = %reward.name, points = user.points, "redemption rejected");
        return Err(HeySaveError::InsufficientPoints {
            needed: reward.cost,
            available: user.points,
        });
    }

    db::adjust_balance_and_points(&tx, user_id, 0.0, -reward.cost)?;
    let code = loyalty::generate_code(reward, user_id);
    let redeemed = db::insert_redeemed_reward(&tx, user_id, &reward.name, &code)?;
    db::insert_event(
        &tx,
        &Event::new(
            "reward_redeemed",
            "user",
            user_id,
            serde_json::json!({ "reward": reward.name, "cost": reward.cost, "code": code }),
            session.actor(),
        ),
    )?;
    tx.commit()?;

    info!(user_id, reward = %reward.name, cost = reward.cost, "reward redeemed");
    Ok(Redemption {
        reward: redeemed,
        snapshot: snapshot(conn, user_id)?,
    })
}

/// Most-recent-first history of the logged-in user
pub fn recent_transactions(
    conn: &Connection,
    session: &Session,
    limit: Option<usize>,
) -> Result<Vec<Transaction>> {
    let user_id = session.require_user()?;
    db::get_transactions(conn, user_id, limit)
}
