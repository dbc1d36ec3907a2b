// ⭐ Loyalty - HeyPoints tiers and the reward catalog

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Points earned per unit of money deposited into a goal
pub const POINTS_PER_DEPOSIT_UNIT: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Diamond,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "Bronze",
            Tier::Silver => "Silver",
            Tier::Gold => "Gold",
            Tier::Diamond => "Diamond",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInfo {
    pub tier: Tier,

    /// Points at which the next tier starts. Diamond reports 5000 even
    /// though nothing lies above it.
    pub next_threshold: i64,
}

pub fn compute_tier(points: i64) -> TierInfo {
    let (tier, next_threshold) = if points < 100 {
        (Tier::Bronze, 100)
    } else if points < 500 {
        (Tier::Silver, 500)
    } else if points < 1500 {
        (Tier::Gold, 1500)
    } else {
        (Tier::Diamond, 5000)
    };

    TierInfo {
        tier,
        next_threshold,
    }
}

/// Points for a goal deposit: floor(amount * 0.25)
pub fn points_for_deposit(amount: f64) -> i64 {
    (amount * POINTS_PER_DEPOSIT_UNIT).floor() as i64
}

// ============================================================================
// REWARDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub icon: String,
    pub name: String,
    pub cost: i64,
    /// Prefix of every code generated for this reward
    pub code: String,
}

impl Reward {
    pub fn new(icon: &str, name: &str, cost: i64, code: &str) -> Self {
        Reward {
            icon: icon.to_string(),
            name: name.to_string(),
            cost,
            code: code.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RewardCatalog {
    rewards: Vec<Reward>,
}

impl RewardCatalog {
    pub fn new(rewards: Vec<Reward>) -> Self {
        RewardCatalog { rewards }
    }

    pub fn all(&self) -> &[Reward] {
        &self.rewards
    }

    pub fn get(&self, index: usize) -> Option<&Reward> {
        self.rewards.get(index)
    }

    pub fn find_by_code(&self, code: &str) -> Option<&Reward> {
        self.rewards.iter().find(|r| r.code.eq_ignore_ascii_case(code))
    }

    /// Rewards the given balance can pay for
    pub fn affordable(&self, points: i64) -> Vec<&Reward> {
        self.rewards.iter().filter(|r| r.cost <= points).collect()
    }
}

impl Default for RewardCatalog {
    fn default() -> Self {
        RewardCatalog::new(vec![
            Reward::new("☕", "Free Coffee", 50, "CAFE-FREE"),
            Reward::new("🍿", "2x1 Cinema", 150, "CINE-X2"),
            Reward::new("📚", "Book -20%", 300, "BOOK-20"),
            Reward::new("🎧", "Spotify 1 Month", 600, "SPOT-1M"),
        ])
    }
}

/// Redemption code: reward prefix plus 6 hex chars unique to this redemption
pub fn generate_code(reward: &Reward, user_id: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}{}{}",
        reward.code,
        user_id,
        uuid::Uuid::new_v4()
    ));
    let digest = format!("{:X}", hasher.finalize());
    format!("{}-{}", reward.code, &digest[..6])
}
