// Entity Models
// Reference data the rule engine consults (banks) and the input forms
// that feed it (cards).

pub mod bank;
pub mod card;

pub use bank::{detect_card_network, Bank, BankRegistry, CardDetection, CardNetwork, UNKNOWN_BANK};
