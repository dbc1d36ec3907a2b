use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use heysave::{
    compute_tier, db, detect_card_network, detect_category, generate_tips, logging, AppConfig,
    RewardCatalog,
};

#[derive(Parser)]
#[command(name = "heysave", version, about = "HeySave personal finance tools")]
struct Cli {
    /// SQLite database (defaults to HEYSAVE_DB or heysave.db)
    #[arg(long, global = true, env = "HEYSAVE_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or migrate the database
    Init,
    /// Category a description would be filed under
    Category { description: String },
    /// Network and bank for a card number
    Card { number: String },
    /// Loyalty tier for a points balance
    Tier { points: i64 },
    /// List the reward catalog
    Rewards,
    /// Spending tips for a user
    Tips { username: String },
    /// Latest transactions for a user
    History {
        username: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let mut config = AppConfig::from_env();
    let cli = Cli::parse();
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    logging::init(&config);

    match cli.command {
        Command::Init => {
            db::open_database(&config.database_path)?;
            println!("✓ Database ready at {}", config.database_path.display());
        }
        Command::Category { description } => {
            println!("{}", detect_category(&description));
        }
        Command::Card { number } => {
            let detection = detect_card_network(&number);
            println!("Bank:    {}", detection.bank);
            println!("Network: {}", detection.network_name());
        }
        Command::Tier { points } => {
            let info = compute_tier(points);
            println!("{} (next at {} pts)", info.tier.as_str(), info.next_threshold);
        }
        Command::Rewards => {
            for (index, reward) in RewardCatalog::default().all().iter().enumerate() {
                println!("{}. {} {} - {} pts", index, reward.icon, reward.name, reward.cost);
            }
        }
        Command::Tips { username } => {
            let conn = db::open_database(&config.database_path)?;
            let user = find_user(&conn, &username)?;
            for tip in generate_tips(&conn, user.id)? {
                println!("• {}", tip);
            }
        }
        Command::History { username, limit } => {
            let conn = db::open_database(&config.database_path)?;
            let user = find_user(&conn, &username)?;
            println!("Balance: S/. {:.2}  Goals: S/. {:.2}  Points: {}", user.balance, user.goals_balance, user.points);
            for tx in db::get_transactions(&conn, user.id, Some(limit))? {
                println!(
                    "{}  {:<30} {:<14} {:>+10.2}",
                    tx.date,
                    tx.description,
                    tx.category,
                    tx.signed_amount()
                );
            }
        }
    }

    Ok(())
}

fn find_user(conn: &rusqlite::Connection, username: &str) -> Result<heysave::User> {
    db::find_user_by_username(conn, username)?
        .ok_or_else(|| anyhow!("user not found: {}", username))
}
