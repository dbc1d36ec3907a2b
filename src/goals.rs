// 🎯 Goal Ledger - savings goals
//
// Open -> (deposits) -> Completed -> keep | withdraw internally | transfer out
//
// Withdrawal and transfer both zero the goal, so the same row starts over
// as Open. Withdrawn money lands in the goals balance, never the primary
// balance, so it cannot be deposited again to farm points.

use crate::auth::Session;
use crate::db::{self, Event, Goal, NewTransaction, TransactionKind};
use crate::error::{HeySaveError, Result, Violations};
use crate::ledger::{self, AccountSnapshot};
use crate::loyalty;
use crate::rules::Category;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const SAME_BANK_MIN_DIGITS: usize = 6;
pub const CCI_DIGITS: usize = 20;

pub const MSG_GOAL_NAME_REQUIRED: &str = "Goal name is required.";
pub const MSG_GOAL_TARGET_POSITIVE: &str = "Target amount must be greater than zero.";
pub const MSG_BAD_ACCOUNT: &str = "Invalid account number.";
pub const MSG_BAD_CCI: &str = "The CCI must have 20 digits.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalState {
    Open,
    Completed,
}

impl GoalState {
    pub fn of(goal: &Goal) -> GoalState {
        if goal.saved >= goal.target {
            GoalState::Completed
        } else {
            GoalState::Open
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    /// Account at the same bank: more than 5 digits
    SameBank,
    /// Interbank code (CCI): exactly 20 digits
    Interbank,
}

/// What to do with a completed goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Settlement {
    Keep,
    WithdrawInternal,
    TransferExternal {
        destination: String,
        kind: TransferKind,
    },
}

fn load_goal(conn: &Connection, user_id: i64, goal_id: i64) -> Result<Goal> {
    db::find_goal(conn, user_id, goal_id)?.ok_or_else(|| HeySaveError::not_found("Goal", goal_id))
}

fn require_completed(goal: &Goal) -> Result<()> {
    match GoalState::of(goal) {
        GoalState::Completed => Ok(()),
        GoalState::Open => Err(HeySaveError::GoalNotCompleted {
            saved: goal.saved,
            target: goal.target,
        }),
    }
}

pub fn create_goal(conn: &Connection, session: &Session, name: &str, target: f64) -> Result<Goal> {
    let user_id = session.require_user()?;

    let mut violations = Violations::new();
    violations.check(!name.trim().is_empty(), MSG_GOAL_NAME_REQUIRED);
    violations.check(target.is_finite() && target > 0.0, MSG_GOAL_TARGET_POSITIVE);
    violations.into_result()?;

    let goal_id = db::insert_goal(conn, user_id, name.trim(), target)?;
    info!(user_id, goal_id, target, "goal created");
    load_goal(conn, user_id, goal_id)
}

pub fn list_goals(conn: &Connection, session: &Session) -> Result<Vec<Goal>> {
    db::get_goals(conn, session.require_user()?)
}

/// Move money from the primary balance into an open goal, earning
/// floor(amount * 0.25) points
pub fn deposit(
    conn: &Connection,
    session: &Session,
    goal_id: i64,
    amount: f64,
) -> Result<AccountSnapshot> {
    let user_id = session.require_user()?;

    let mut violations = Violations::new();
    ledger::validate_amount(amount, &mut violations);
    violations.into_result()?;

    let tx = conn.unchecked_transaction()?;
    let goal = load_goal(&tx, user_id, goal_id)?;
    if GoalState::of(&goal) == GoalState::Completed {
        return Err(HeySaveError::GoalAlreadyCompleted);
    }

    let user = db::get_user(&tx, user_id)?;
    if amount > user.balance {
        warn!(user_id, goal_id, amount, balance = user.balance, "deposit rejected: insufficient funds");
        return Err(HeySaveError::InsufficientFunds {
            needed: amount,
            available: user.balance,
        });
    }

    let points = loyalty::points_for_deposit(amount);
    db::add_to_goal(&tx, goal_id, amount)?;
    db::adjust_balance_and_points(&tx, user_id, -amount, points)?;
    db::insert_event(
        &tx,
        &Event::new(
            "goal_deposit",
            "goal",
            goal_id,
            serde_json::json!({ "amount": amount, "points": points }),
            session.actor(),
        ),
    )?;
    tx.commit()?;

    info!(user_id, goal_id, amount, points, "goal deposit");
    ledger::snapshot(conn, user_id)
}

/// Completed goal -> goals balance. Logged as income tagged "Ahorro".
pub fn withdraw_internal(conn: &Connection, session: &Session, goal_id: i64) -> Result<AccountSnapshot> {
    let user_id = session.require_user()?;

    let tx = conn.unchecked_transaction()?;
    let goal = load_goal(&tx, user_id, goal_id)?;
    require_completed(&goal)?;

    db::adjust_goals_balance(&tx, user_id, goal.saved)?;
    db::reset_goal(&tx, goal_id)?;
    db::insert_transaction(
        &tx,
        &NewTransaction {
            user_id,
            description: &format!("Goal withdrawal: {}", goal.name),
            category: Category::Savings.as_str(),
            amount: goal.saved,
            kind: TransactionKind::Income,
        },
    )?;
    db::insert_event(
        &tx,
        &Event::new(
            "goal_withdrawn",
            "goal",
            goal_id,
            serde_json::json!({ "amount": goal.saved }),
            session.actor(),
        ),
    )?;
    tx.commit()?;

    info!(user_id, goal_id, amount = goal.saved, "goal withdrawn to goals balance");
    ledger::snapshot(conn, user_id)
}

/// Destination must be all digits: more than 5 for the same bank, exactly
/// 20 for a CCI. Surrounding whitespace is not a digit and is rejected.
pub fn validate_destination(destination: &str, kind: TransferKind) -> Result<&str> {
    let numeric = !destination.is_empty() && destination.chars().all(|c| c.is_ascii_digit());

    match kind {
        TransferKind::SameBank if numeric && destination.len() >= SAME_BANK_MIN_DIGITS => {
            Ok(destination)
        }
        TransferKind::Interbank if numeric && destination.len() == CCI_DIGITS => Ok(destination),
        TransferKind::SameBank => Err(HeySaveError::validation(MSG_BAD_ACCOUNT)),
        TransferKind::Interbank => Err(HeySaveError::validation(MSG_BAD_CCI)),
    }
}

/// Completed goal -> outside the system. No balance receives the money;
/// logged as an expense tagged "Transferencia".
pub fn transfer_external(
    conn: &Connection,
    session: &Session,
    goal_id: i64,
    destination: &str,
    kind: TransferKind,
) -> Result<AccountSnapshot> {
    let user_id = session.require_user()?;
    let destination = validate_destination(destination, kind)?;

    let tx = conn.unchecked_transaction()?;
    let goal = load_goal(&tx, user_id, goal_id)?;
    require_completed(&goal)?;

    let description = match kind {
        TransferKind::SameBank => format!("Transfer to {}: {}", destination, goal.name),
        TransferKind::Interbank => format!("CCI transfer {}: {}", destination, goal.name),
    };

    db::reset_goal(&tx, goal_id)?;
    db::insert_transaction(
        &tx,
        &NewTransaction {
            user_id,
            description: &description,
            category: Category::Transfer.as_str(),
            amount: goal.saved,
            kind: TransactionKind::Expense,
        },
    )?;
    db::insert_event(
        &tx,
        &Event::new(
            "goal_transferred",
            "goal",
            goal_id,
            serde_json::json!({ "amount": goal.saved, "kind": kind }),
            session.actor(),
        ),
    )?;
    tx.commit()?;

    info!(user_id, goal_id, amount = goal.saved, ?kind, "goal transferred out");
    ledger::snapshot(conn, user_id)
}

/// Apply one of the completed-goal actions
pub fn settle(
    conn: &Connection,
    session: &Session,
    goal_id: i64,
    settlement: &Settlement,
) -> Result<AccountSnapshot> {
    match settlement {
        Settlement::Keep => {
            let user_id = session.require_user()?;
            require_completed(&load_goal(conn, user_id, goal_id)?)?;
            ledger::snapshot(conn, user_id)
        }
        Settlement::WithdrawInternal => withdraw_internal(conn, session, goal_id),
        Settlement::TransferExternal { destination, kind } => {
            transfer_external(conn, session, goal_id, destination, *kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{insert_test_user, test_conn};

    fn setup(balance: f64) -> (Connection, Session) {
        let conn = test_conn();
        let id = insert_test_user(&conn, "ana", balance);
        let user = db::get_user(&conn, id).unwrap();
        (conn, Session::for_user(&user))
    }

    fn completed_goal(conn: &Connection, session: &Session, target: f64) -> Goal {
        let goal = create_goal(conn, session, "Laptop", target).unwrap();
        deposit(conn, session, goal.id, target).unwrap();
        load_goal(conn, session.require_user().unwrap(), goal.id).unwrap()
    }

    #[test]
    fn test_create_goal_validation() {
        let (conn, session) = setup(0.0);

        let err = create_goal(&conn, &session, "", 0.0).unwrap_err();
        assert_eq!(err.messages(), vec![MSG_GOAL_NAME_REQUIRED, MSG_GOAL_TARGET_POSITIVE]);

        let goal = create_goal(&conn, &session, " Viaje ", 300.0).unwrap();
        assert_eq!(goal.name, "Viaje");
        assert_eq!(goal.saved, 0.0);
        assert_eq!(GoalState::of(&goal), GoalState::Open);
        assert_eq!(list_goals(&conn, &session).unwrap().len(), 1);
    }

    #[test]
    fn test_deposit_moves_money_and_earns_points() {
        let (conn, session) = setup(100.0);
        let goal = create_goal(&conn, &session, "Laptop", 500.0).unwrap();

        let snap = deposit(&conn, &session, goal.id, 41.0).unwrap();
        assert_eq!(snap.balance, 59.0);
        assert_eq!(snap.points, 10);
        assert_eq!(snap.goals[0].saved, 41.0);
        // Deposits are not part of the transaction history
        assert!(snap.recent_transactions.is_empty());
    }

    #[test]
    fn test_deposit_over_balance_changes_nothing() {
        let (conn, session) = setup(50.0);
        let goal = create_goal(&conn, &session, "Laptop", 500.0).unwrap();

        let err = deposit(&conn, &session, goal.id, 50.5).unwrap_err();
        assert!(matches!(err, HeySaveError::InsufficientFunds { .. }));

        let snap = ledger::snapshot(&conn, session.require_user().unwrap()).unwrap();
        assert_eq!(snap.balance, 50.0);
        assert_eq!(snap.points, 0);
        assert_eq!(snap.goals[0].saved, 0.0);
    }

    #[test]
    fn test_deposit_validation() {
        let (conn, session) = setup(50.0);
        let goal = create_goal(&conn, &session, "Laptop", 500.0).unwrap();
        assert!(matches!(
            deposit(&conn, &session, goal.id, 0.0),
            Err(HeySaveError::Validation(_))
        ));
        assert!(matches!(
            deposit(&conn, &session, goal.id + 1, 10.0),
            Err(HeySaveError::NotFound { entity: "Goal", .. })
        ));
    }

    #[test]
    fn test_exact_deposit_completes_goal() {
        let (conn, session) = setup(300.0);
        let goal = create_goal(&conn, &session, "Bici", 200.0).unwrap();

        deposit(&conn, &session, goal.id, 120.0).unwrap();
        let snap = deposit(&conn, &session, goal.id, 80.0).unwrap();

        let goal = &snap.goals[0];
        assert_eq!(goal.saved, goal.target);
        assert_eq!(GoalState::of(goal), GoalState::Completed);
        assert_eq!(goal.progress(), 1.0);

        assert!(matches!(
            deposit(&conn, &session, goal.id, 1.0),
            Err(HeySaveError::GoalAlreadyCompleted)
        ));
    }

    #[test]
    fn test_deposit_may_overshoot_target() {
        let (conn, session) = setup(300.0);
        let goal = create_goal(&conn, &session, "Bici", 100.0).unwrap();

        let snap = deposit(&conn, &session, goal.id, 150.0).unwrap();
        assert_eq!(snap.goals[0].saved, 150.0);
        assert_eq!(snap.goals[0].progress(), 1.0);
    }

    #[test]
    fn test_withdraw_internal_goes_to_goals_balance() {
        let (conn, session) = setup(200.0);
        let goal = completed_goal(&conn, &session, 200.0);
        let before = ledger::snapshot(&conn, session.require_user().unwrap()).unwrap();
        assert_eq!(before.balance, 0.0);

        let snap = withdraw_internal(&conn, &session, goal.id).unwrap();
        assert_eq!(snap.goals_balance, 200.0);
        assert_eq!(snap.balance, before.balance);
        assert_eq!(snap.points, before.points);
        assert_eq!(snap.goals[0].saved, 0.0);
        assert_eq!(GoalState::of(&snap.goals[0]), GoalState::Open);

        let tx = &snap.recent_transactions[0];
        assert_eq!(tx.kind, TransactionKind::Income);
        assert_eq!(tx.category, "Ahorro");
        assert_eq!(tx.amount, 200.0);
        assert_eq!(tx.description, "Goal withdrawal: Laptop");
    }

    #[test]
    fn test_withdraw_requires_completed() {
        let (conn, session) = setup(100.0);
        let goal = create_goal(&conn, &session, "Laptop", 500.0).unwrap();
        deposit(&conn, &session, goal.id, 100.0).unwrap();

        let err = withdraw_internal(&conn, &session, goal.id).unwrap_err();
        assert!(matches!(err, HeySaveError::GoalNotCompleted { .. }));

        let snap = ledger::snapshot(&conn, session.require_user().unwrap()).unwrap();
        assert_eq!(snap.goals_balance, 0.0);
        assert_eq!(snap.goals[0].saved, 100.0);
    }

    #[test]
    fn test_validate_destination() {
        assert!(validate_destination("123456", TransferKind::SameBank).is_ok());
        assert!(validate_destination("12345", TransferKind::SameBank).is_err());
        assert!(validate_destination("12345a", TransferKind::SameBank).is_err());
        assert!(validate_destination("12345678901234567890", TransferKind::Interbank).is_ok());
        assert!(validate_destination("1234567890123456789", TransferKind::Interbank).is_err());
        assert!(validate_destination("", TransferKind::Interbank).is_err());

        let err = validate_destination("1234-5678", TransferKind::SameBank).unwrap_err();
        assert_eq!(err.messages(), vec![MSG_BAD_ACCOUNT]);
    }

    #[test]
    fn test_destination_with_spaces_is_not_numeric() {
        assert!(validate_destination(" 123456", TransferKind::SameBank).is_err());
        assert!(validate_destination("123456 ", TransferKind::SameBank).is_err());
        assert!(validate_destination(" 12345678901234567890", TransferKind::Interbank).is_err());
    }

    #[test]
    fn test_transfer_external_same_bank() {
        let (conn, session) = setup(150.0);
        let goal = completed_goal(&conn, &session, 150.0);

        let snap = transfer_external(&conn, &session, goal.id, "19312345678", TransferKind::SameBank)
            .unwrap();
        assert_eq!(snap.balance, 0.0);
        assert_eq!(snap.goals_balance, 0.0);
        assert_eq!(snap.goals[0].saved, 0.0);

        let tx = &snap.recent_transactions[0];
        assert_eq!(tx.kind, TransactionKind::Expense);
        assert_eq!(tx.category, "Transferencia");
        assert_eq!(tx.description, "Transfer to 19312345678: Laptop");
        assert_eq!(tx.amount, 150.0);
    }

    #[test]
    fn test_transfer_external_cci() {
        let (conn, session) = setup(80.0);
        let goal = completed_goal(&conn, &session, 80.0);

        let snap = transfer_external(
            &conn,
            &session,
            goal.id,
            "00219300123456789012",
            TransferKind::Interbank,
        )
        .unwrap();
        assert_eq!(
            snap.recent_transactions[0].description,
            "CCI transfer 00219300123456789012: Laptop"
        );
    }

    #[test]
    fn test_transfer_bad_destination_no_mutation() {
        let (conn, session) = setup(80.0);
        let goal = completed_goal(&conn, &session, 80.0);

        let err = transfer_external(&conn, &session, goal.id, "123", TransferKind::Interbank)
            .unwrap_err();
        assert_eq!(err.messages(), vec![MSG_BAD_CCI]);

        let goals = list_goals(&conn, &session).unwrap();
        assert_eq!(goals[0].saved, 80.0);
    }

    #[test]
    fn test_settle_dispatch_and_reuse() {
        let (conn, session) = setup(100.0);
        let goal = completed_goal(&conn, &session, 50.0);

        let kept = settle(&conn, &session, goal.id, &Settlement::Keep).unwrap();
        assert_eq!(kept.goals[0].saved, 50.0);

        let snap = settle(&conn, &session, goal.id, &Settlement::WithdrawInternal).unwrap();
        assert_eq!(snap.goals_balance, 50.0);

        // The same goal row accepts deposits again
        let snap = deposit(&conn, &session, goal.id, 50.0).unwrap();
        assert_eq!(snap.goals[0].saved, 50.0);
        assert_eq!(snap.balance, 0.0);

        assert!(matches!(
            settle(&conn, &session, goal.id, &Settlement::Keep),
            Ok(_)
        ));
    }

    #[test]
    fn test_other_users_goal_is_not_found() {
        let (conn, session) = setup(100.0);
        let goal = completed_goal(&conn, &session, 50.0);

        let bob_id = insert_test_user(&conn, "bob", 0.0);
        let bob = Session::for_user(&db::get_user(&conn, bob_id).unwrap());
        assert!(matches!(
            withdraw_internal(&conn, &bob, goal.id),
            Err(HeySaveError::NotFound { .. })
        ));
    }

    #[test]
    fn test_settlement_json_shape() {
        let json = serde_json::json!({
            "action": "transfer_external",
            "destination": "123456",
            "kind": "SameBank"
        });
        let settlement: Settlement = serde_json::from_value(json).unwrap();
        assert_eq!(
            settlement,
            Settlement::TransferExternal {
                destination: "123456".into(),
                kind: TransferKind::SameBank
            }
        );
    }
}
