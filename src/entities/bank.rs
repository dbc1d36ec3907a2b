// 🏦 Bank Entity - card-prefix registry
//
// A card number tells us two things:
// - network, from the first digit (4 = Visa, 5 = Mastercard)
// - issuing bank, from a 4-digit prefix table
//
// Banks keep a stable UUID so renaming one never breaks stored users.

use serde::{Deserialize, Serialize};

/// Bank name reported when no prefix matches and the network is unknown
pub const UNKNOWN_BANK: &str = "Unknown";

// ============================================================================
// CARD NETWORK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardNetwork {
    Visa,
    Mastercard,
    /// Any other leading digit
    Generic,
}

impl CardNetwork {
    pub fn from_leading_digit(digits: &str) -> CardNetwork {
        match digits.chars().next() {
            Some('4') => CardNetwork::Visa,
            Some('5') => CardNetwork::Mastercard,
            _ => CardNetwork::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CardNetwork::Visa => "Visa",
            CardNetwork::Mastercard => "Mastercard",
            CardNetwork::Generic => "Card",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, CardNetwork::Generic)
    }
}

// ============================================================================
// BANK ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    /// Stable identity (UUID)
    pub id: String,

    pub canonical_name: String,

    /// Country code (ISO 3166-1 alpha-2)
    pub country: String,

    /// 4-digit card prefixes issued by this bank
    pub card_prefixes: Vec<String>,
}

impl Bank {
    pub fn new(canonical_name: &str, country: &str, card_prefixes: &[&str]) -> Self {
        Bank {
            id: uuid::Uuid::new_v4().to_string(),
            canonical_name: canonical_name.to_string(),
            country: country.to_string(),
            card_prefixes: card_prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn issues(&self, digits: &str) -> bool {
        self.card_prefixes.iter().any(|p| digits.starts_with(p.as_str()))
    }
}

// ============================================================================
// DETECTION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardDetection {
    pub bank: String,

    /// None until at least 4 digits are known
    pub network: Option<CardNetwork>,
}

impl CardDetection {
    /// Network label; empty while undetermined
    pub fn network_name(&self) -> &'static str {
        self.network.map(|n| n.as_str()).unwrap_or("")
    }

    pub fn is_bank_known(&self) -> bool {
        self.bank != UNKNOWN_BANK
    }

    /// Bank name stored on the user row at signup
    pub fn registered_bank_name(&self) -> String {
        if self.is_bank_known() {
            self.bank.clone()
        } else {
            format!("{} Genérico", self.network_name())
        }
    }
}

// ============================================================================
// BANK REGISTRY
// ============================================================================

pub struct BankRegistry {
    banks: Vec<Bank>,
}

impl BankRegistry {
    /// Create new registry with the default Peruvian banks
    pub fn new() -> Self {
        let mut registry = BankRegistry { banks: Vec::new() };
        registry.register_default_banks();
        registry
    }

    pub fn empty() -> Self {
        BankRegistry { banks: Vec::new() }
    }

    fn register_default_banks(&mut self) {
        self.register(Bank::new("BCP", "PE", &["4551", "4214", "5491"]));
        self.register(Bank::new("BBVA", "PE", &["4550", "4919", "5160"]));
        self.register(Bank::new("Interbank", "PE", &["4213", "4458", "5204"]));
        self.register(Bank::new("Scotiabank", "PE", &["4555", "5406"]));
        self.register(Bank::new("Banco de la Nación", "PE", &["4111"]));
    }

    pub fn register(&mut self, bank: Bank) {
        self.banks.push(bank);
    }

    pub fn find_by_prefix(&self, digits: &str) -> Option<&Bank> {
        self.banks.iter().find(|bank| bank.issues(digits))
    }

    pub fn all_banks(&self) -> &[Bank] {
        &self.banks
    }

    pub fn count(&self) -> usize {
        self.banks.len()
    }

    /// Infer network and bank from a (possibly partial, space-grouped) card number
    pub fn detect(&self, card_number: &str) -> CardDetection {
        let digits: String = card_number.chars().filter(|c| *c != ' ').collect();

        if digits.chars().count() < 4 {
            return CardDetection {
                bank: UNKNOWN_BANK.to_string(),
                network: None,
            };
        }

        let network = CardNetwork::from_leading_digit(&digits);
        let bank = match self.find_by_prefix(&digits) {
            Some(bank) => bank.canonical_name.clone(),
            None if network.is_known() => format!("{} Bank", network.as_str()),
            None => UNKNOWN_BANK.to_string(),
        };

        CardDetection {
            bank,
            network: Some(network),
        }
    }
}

impl Default for BankRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Detection against the default registry
pub fn detect_card_network(card_number: &str) -> CardDetection {
    BankRegistry::new().detect(card_number)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcp_visa() {
        let d = detect_card_network("4551 2345 6789 0123");
        assert_eq!(d.bank, "BCP");
        assert_eq!(d.network, Some(CardNetwork::Visa));
        assert_eq!(d.network_name(), "Visa");
    }

    #[test]
    fn test_each_default_bank() {
        assert_eq!(detect_card_network("5491000000000000").bank, "BCP");
        assert_eq!(detect_card_network("4919000000000000").bank, "BBVA");
        assert_eq!(detect_card_network("5204000000000000").bank, "Interbank");
        assert_eq!(detect_card_network("5406000000000000").bank, "Scotiabank");
        assert_eq!(detect_card_network("4111111111111111").bank, "Banco de la Nación");
    }

    #[test]
    fn test_unknown_prefix_known_network() {
        let d = detect_card_network("4999000000000000");
        assert_eq!(d.bank, "Visa Bank");
        assert_eq!(d.registered_bank_name(), "Visa Bank");

        let d = detect_card_network("5999000000000000");
        assert_eq!(d.bank, "Mastercard Bank");
    }

    #[test]
    fn test_generic_card() {
        let d = detect_card_network("1234567890123456");
        assert_eq!(d.network_name(), "Card");
        assert_eq!(d.bank, "Unknown");
        assert_eq!(d.registered_bank_name(), "Card Genérico");
    }

    #[test]
    fn test_too_short() {
        let d = detect_card_network("45 5");
        assert_eq!(d.network, None);
        assert_eq!(d.network_name(), "");
        assert_eq!(d.bank, "Unknown");

        assert_eq!(detect_card_network("").bank, "Unknown");
    }

    #[test]
    fn test_registry_extension() {
        let mut registry = BankRegistry::empty();
        registry.register(Bank::new("Caja Arequipa", "PE", &["6011"]));

        assert_eq!(registry.count(), 1);
        let d = registry.detect("6011 0000");
        assert_eq!(d.bank, "Caja Arequipa");
        assert_eq!(d.network, Some(CardNetwork::Generic));
    }

    #[test]
    fn test_default_registry_size() {
        assert_eq!(BankRegistry::new().count(), 5);
    }
}
