// 💡 Spending tips - derived from expense categories and current balance

use crate::db;
use crate::error::Result;
use crate::rules::Category;
use rusqlite::Connection;
use tracing::debug;

pub const CRITICAL_BALANCE: f64 = 20.0;
pub const CAUTION_BALANCE: f64 = 50.0;

pub const TIP_NO_EXPENSES: &str = "👋 Record your first expenses to receive tips.";
pub const TIP_FOOD: &str = "🍔 Food: cooking at home saves up to S/. 120 a month.";
pub const TIP_TRANSPORT: &str = "🚕 Transport: have you tried sharing rides or taking the bus?";
pub const TIP_ENTERTAINMENT: &str = "🎬 Leisure: look for student discounts.";
pub const TIP_CRITICAL: &str = "🚨 URGENT: critical balance (< S/. 20).";
pub const TIP_CAUTION: &str = "⚠️ Careful: prioritize essentials (< S/. 50).";
pub const TIP_HEALTHY: &str = "✅ Healthy finances! Keep it up.";

/// Tips for a user who has recorded expenses in `categories`.
/// An empty slice means no expenses yet and yields only the placeholder.
pub fn tips_for(categories: &[Category], balance: f64) -> Vec<String> {
    if categories.is_empty() {
        return vec![TIP_NO_EXPENSES.to_string()];
    }

    let mut tips = Vec::new();

    // Education and fashion are detected but have no tip
    for (category, tip) in [
        (Category::Food, TIP_FOOD),
        (Category::Transport, TIP_TRANSPORT),
        (Category::Entertainment, TIP_ENTERTAINMENT),
    ] {
        if categories.contains(&category) {
            tips.push(tip.to_string());
        }
    }

    if balance < CRITICAL_BALANCE {
        tips.push(TIP_CRITICAL.to_string());
    } else if balance < CAUTION_BALANCE {
        tips.push(TIP_CAUTION.to_string());
    }

    if tips.is_empty() {
        tips.push(TIP_HEALTHY.to_string());
    }
    tips
}

pub fn generate_tips(conn: &Connection, user_id: i64) -> Result<Vec<String>> {
    let user = db::get_user(conn, user_id)?;
    let labels = db::expense_categories(conn, user_id)?;

    // Unknown labels still count as "has expenses"
    let mut categories: Vec<Category> = labels
        .iter()
        .map(|label| Category::from_label(label).unwrap_or(Category::Misc))
        .collect();
    categories.dedup();

    debug!(user_id, categories = labels.len(), "generating tips");
    Ok(tips_for(&categories, user.balance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{insert_test_user, test_conn};
    use crate::db::{insert_transaction, NewTransaction, TransactionKind};

    #[test]
    fn test_placeholder_without_expenses() {
        assert_eq!(tips_for(&[], 5.0), vec![TIP_NO_EXPENSES]);
    }

    #[test]
    fn test_category_tips_in_fixed_order() {
        let tips = tips_for(&[Category::Entertainment, Category::Food], 500.0);
        assert_eq!(tips, vec![TIP_FOOD, TIP_ENTERTAINMENT]);
    }

    #[test]
    fn test_education_and_fashion_have_no_tip() {
        let tips = tips_for(&[Category::Education, Category::Fashion], 500.0);
        assert_eq!(tips, vec![TIP_HEALTHY]);
    }

    #[test]
    fn test_balance_urgency() {
        assert_eq!(tips_for(&[Category::Misc], 19.99), vec![TIP_CRITICAL]);
        assert_eq!(tips_for(&[Category::Misc], 20.0), vec![TIP_CAUTION]);
        assert_eq!(tips_for(&[Category::Misc], 50.0), vec![TIP_HEALTHY]);

        let tips = tips_for(&[Category::Transport], 10.0);
        assert_eq!(tips, vec![TIP_TRANSPORT, TIP_CRITICAL]);
    }

    #[test]
    fn test_generate_tips_from_store() {
        let conn = test_conn();
        let id = insert_test_user(&conn, "ana", 35.0);

        assert_eq!(generate_tips(&conn, id).unwrap(), vec![TIP_NO_EXPENSES]);

        // Income alone does not count as spending history
        insert_transaction(
            &conn,
            &NewTransaction {
                user_id: id,
                description: "sueldo",
                category: "Income",
                amount: 100.0,
                kind: TransactionKind::Income,
            },
        )
        .unwrap();
        assert_eq!(generate_tips(&conn, id).unwrap(), vec![TIP_NO_EXPENSES]);

        insert_transaction(
            &conn,
            &NewTransaction {
                user_id: id,
                description: "pizza",
                category: "Food",
                amount: 10.0,
                kind: TransactionKind::Expense,
            },
        )
        .unwrap();
        assert_eq!(generate_tips(&conn, id).unwrap(), vec![TIP_FOOD, TIP_CAUTION]);
    }
}
