// HeySave - Core Library
// Rule engine and ledgers for the personal finance app.
// Exposes all modules for use in the CLI, the API server, and tests.

pub mod config;
pub mod logging;
pub mod error;
pub mod db;
pub mod rules;      // Category detection
pub mod entities;   // Banks and card input
pub mod loyalty;    // Tiers and rewards
pub mod tips;
pub mod auth;       // Session, registration wizard, login
pub mod ledger;     // Account ledger
pub mod goals;      // Goal ledger
pub mod profile;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{HeySaveError, Result};
pub use db::{
    Event, Goal, RedeemedReward, Transaction, TransactionKind, User,
    open_database, setup_database, migrate_add_columns,
};
pub use rules::{detect_category, Category, CategoryRule, RuleEngine};
pub use entities::{detect_card_network, Bank, BankRegistry, CardDetection, CardNetwork};
pub use loyalty::{compute_tier, Reward, RewardCatalog, Tier, TierInfo};
pub use tips::generate_tips;
pub use auth::{RegistrationWizard, Session, Step1Input, Step2Input, WizardStep};
pub use ledger::{record_expense, record_income, redeem_reward, AccountSnapshot, Redemption};
pub use goals::{GoalState, Settlement, TransferKind};
pub use profile::Profile;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
