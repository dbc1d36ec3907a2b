// 🏷️ Category Rules - Rules as Data
// Keyword rules that turn a free-text description into a spending category

use serde::{Deserialize, Serialize};

// ============================================================================
// CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Food,
    Transport,
    Entertainment,
    Education,
    Fashion,
    /// Fallback when no keyword matches
    Misc,

    // Labels assigned by the ledgers, never detected from text
    Income,
    Savings,
    Transfer,
}

impl Category {
    /// Label as stored in the `transactions.category` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "Food",
            Category::Transport => "Transport",
            Category::Entertainment => "Entertainment",
            Category::Education => "Education",
            Category::Fashion => "Fashion",
            Category::Misc => "Misc",
            Category::Income => "Income",
            Category::Savings => "Ahorro",
            Category::Transfer => "Transferencia",
        }
    }

    pub fn from_label(label: &str) -> Option<Category> {
        let category = match label {
            "Food" => Category::Food,
            "Transport" => Category::Transport,
            "Entertainment" => Category::Entertainment,
            "Education" => Category::Education,
            "Fashion" => Category::Fashion,
            "Misc" => Category::Misc,
            "Income" => Category::Income,
            "Ahorro" => Category::Savings,
            "Transferencia" => Category::Transfer,
            _ => return None,
        };
        Some(category)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: Category,

    /// Lower-case keywords; any one of them appearing in the text matches
    pub keywords: Vec<String>,

    /// Priority (higher = applied first)
    #[serde(default)]
    pub priority: i32,
}

impl CategoryRule {
    pub fn new(category: Category, keywords: &[&str], priority: i32) -> Self {
        CategoryRule {
            category,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            priority,
        }
    }

    /// `text` must already be lower-cased
    fn matches_lower(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }

    pub fn matches(&self, text: &str) -> bool {
        self.matches_lower(&text.to_lowercase())
    }
}

// ============================================================================
// RULE ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<CategoryRule>,
}

impl RuleEngine {
    /// Create a new empty rule engine
    pub fn new() -> Self {
        RuleEngine { rules: Vec::new() }
    }

    /// Create engine from a list of rules
    pub fn from_rules(mut rules: Vec<CategoryRule>) -> Self {
        // Stable sort keeps insertion order among equal priorities
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        RuleEngine { rules }
    }

    pub fn add_rule(&mut self, rule: CategoryRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// First matching rule wins; no match means `Misc`
    pub fn classify(&self, description: &str) -> Category {
        let text = description.to_lowercase();

        self.rules
            .iter()
            .find(|rule| rule.matches_lower(&text))
            .map(|rule| rule.category)
            .unwrap_or(Category::Misc)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for RuleEngine {
    /// The fixed keyword sets, food first and fashion last
    fn default() -> Self {
        RuleEngine::from_rules(vec![
            CategoryRule::new(
                Category::Food,
                &["comida", "hamburguesa", "pizza", "starbucks", "menu", "kfc", "desayuno"],
                50,
            ),
            CategoryRule::new(
                Category::Transport,
                &["uber", "taxi", "bus", "gasolina", "cabify", "pasaje"],
                40,
            ),
            CategoryRule::new(
                Category::Entertainment,
                &["cine", "netflix", "spotify", "fiesta", "entrada", "juego"],
                30,
            ),
            CategoryRule::new(
                Category::Education,
                &["libro", "fotocopias", "curso", "pension", "universidad", "clase"],
                20,
            ),
            CategoryRule::new(
                Category::Fashion,
                &["ropa", "zapatilla", "polo", "tienda", "shopping"],
                10,
            ),
        ])
    }
}

/// Category for an expense description, using the default rules
pub fn detect_category(description: &str) -> Category {
    RuleEngine::default().classify(description)
}

// ============================================================================
// TESTS
// ============================================================================
