// 🔐 Auth - session context, two-step registration wizard, login
//
// All per-user state the presentation layer used to keep in globals lives
// in `Session`, which is plain serializable data. It is created logged-out,
// bound to a user id by `login`, and cleared by `logout`.

use crate::db::{self, Event, NewUser, User};
use crate::entities::bank::BankRegistry;
use crate::entities::card::{self, digits_only};
use crate::error::{HeySaveError, Result, Violations};
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const NATIONAL_ID_LEN: usize = 8;
pub const MAX_POSTAL_LEN: usize = 10;

pub const MSG_WEAK_PASSWORD: &str = "Weak password (min 6 characters and 1 special character).";
pub const MSG_BAD_NATIONAL_ID: &str = "Invalid national ID (must have 8 digits).";
pub const MSG_MISSING_DATA: &str = "Missing data.";
pub const MSG_MISSING_ADDRESS: &str = "Missing address data.";
pub const MSG_BAD_CARD: &str = "Incomplete card (16 digits).";
pub const MSG_BAD_EXPIRY: &str = "Incomplete expiry date (MM/YY).";
pub const MSG_BAD_CVV: &str = "Invalid CVV (3-4 digits).";

// ============================================================================
// PASSWORDS
// ============================================================================

pub fn hash_password(plain: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            HeySaveError::Credential(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Verify against an argon2 PHC string. Rows written before hashing was
/// introduced hold the cleartext and are compared exactly.
pub fn verify_password(plain: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => plain == stored,
    }
}

/// At least 6 characters and one character that is neither an ASCII
/// letter, a digit, nor whitespace
pub fn is_strong_password(password: &str) -> bool {
    let has_special = password
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace());
    password.chars().count() >= MIN_PASSWORD_LEN && has_special
}

// ============================================================================
// REGISTRATION WIZARD
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step1Input {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub national_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step2Input {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    pub card_number: String,
    pub expiry: String,
    pub cvv: String,
}

/// Step-1 data carried into step 2. The password is already hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRegistration {
    pub username: String,
    pub password_hash: String,
    pub display_name: String,
    pub national_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step")]
pub enum WizardStep {
    Step1,
    Step2 { pending: PendingRegistration },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationWizard {
    step: WizardStep,
    /// Step 2 also collects a billing address
    require_address: bool,
}

impl RegistrationWizard {
    pub fn new(require_address: bool) -> Self {
        RegistrationWizard {
            step: WizardStep::Step1,
            require_address,
        }
    }

    pub fn step(&self) -> &WizardStep {
        &self.step
    }

    pub fn step_number(&self) -> u8 {
        match self.step {
            WizardStep::Step1 => 1,
            WizardStep::Step2 { .. } => 2,
        }
    }

    pub fn pending(&self) -> Option<&PendingRegistration> {
        match &self.step {
            WizardStep::Step1 => None,
            WizardStep::Step2 { pending } => Some(pending),
        }
    }

    /// Validate personal data and check username availability.
    /// On success the wizard moves to step 2.
    pub fn submit_step1(&mut self, conn: &Connection, input: &Step1Input) -> Result<()> {
        if !matches!(self.step, WizardStep::Step1) {
            return Err(HeySaveError::WrongStep { expected: "step 1" });
        }

        let username = input.username.trim();
        let display_name = input.display_name.trim();
        let national_id = digits_only(&input.national_id, None);

        let mut violations = Violations::new();
        violations.check(is_strong_password(&input.password), MSG_WEAK_PASSWORD);
        violations.check(national_id.len() == NATIONAL_ID_LEN, MSG_BAD_NATIONAL_ID);
        violations.check(!username.is_empty() && !display_name.is_empty(), MSG_MISSING_DATA);

        if let Err(err) = violations.into_result() {
            warn!(username, errors = ?err.messages(), "registration step 1 rejected");
            return Err(err);
        }

        if db::username_exists(conn, username)? {
            warn!(username, "registration step 1: username taken");
            return Err(HeySaveError::UsernameTaken(username.to_string()));
        }

        self.step = WizardStep::Step2 {
            pending: PendingRegistration {
                username: username.to_string(),
                password_hash: hash_password(&input.password)?,
                display_name: display_name.to_string(),
                national_id,
            },
        };
        info!(username, "registration step 1 complete");
        Ok(())
    }

    /// Back to step 1; pending data is discarded
    pub fn back(&mut self) {
        self.step = WizardStep::Step1;
    }

    /// Validate card (and address when required), then persist the user.
    /// On success the wizard resets to step 1 and the new user id is returned.
    pub fn submit_step2(&mut self, conn: &Connection, input: &Step2Input) -> Result<i64> {
        let pending = match &self.step {
            WizardStep::Step2 { pending } => pending.clone(),
            WizardStep::Step1 => return Err(HeySaveError::WrongStep { expected: "step 2" }),
        };

        let card_digits = digits_only(&input.card_number, Some(16));
        let expiry = card::format_expiry(&input.expiry);
        let cvv = digits_only(&input.cvv, Some(4));
        let country = non_empty(input.country.as_deref());
        let address = non_empty(input.address.as_deref());
        let postal_code = input
            .postal_code
            .as_deref()
            .map(|p| digits_only(p, Some(MAX_POSTAL_LEN)))
            .filter(|p| !p.is_empty());

        let mut violations = Violations::new();
        if self.require_address {
            violations.check(
                country.is_some() && address.is_some() && postal_code.is_some(),
                MSG_MISSING_ADDRESS,
            );
        }
        violations.check(card::is_valid_card_number(&card_digits), MSG_BAD_CARD);
        violations.check(card::is_valid_expiry(&expiry), MSG_BAD_EXPIRY);
        violations.check(card::is_valid_cvv(&cvv), MSG_BAD_CVV);

        if let Err(err) = violations.into_result() {
            warn!(username = %pending.username, errors = ?err.messages(), "registration step 2 rejected");
            return Err(err);
        }

        let bank = BankRegistry::new().detect(&card_digits).registered_bank_name();

        let inserted = db::insert_user(
            conn,
            &NewUser {
                username: &pending.username,
                password: &pending.password_hash,
                display_name: &pending.display_name,
                national_id: &pending.national_id,
                bank: &bank,
                country,
                address,
                postal_code: postal_code.as_deref(),
            },
        );

        let user_id = match inserted {
            Ok(id) => id,
            Err(HeySaveError::Persistence(rusqlite::Error::SqliteFailure(err, _)))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // Taken between step 1 and step 2
                return Err(HeySaveError::UsernameTaken(pending.username));
            }
            Err(e) => return Err(e),
        };

        db::insert_event(
            conn,
            &Event::new(
                "user_registered",
                "user",
                user_id,
                serde_json::json!({ "bank": bank }),
                &pending.username,
            ),
        )?;

        info!(user_id, username = %pending.username, bank = %bank, "user registered");
        self.step = WizardStep::Step1;
        Ok(user_id)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// SESSION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    user_id: Option<i64>,
    username: Option<String>,
    pub wizard: RegistrationWizard,
}

impl Session {
    pub fn new(require_address: bool) -> Self {
        Session {
            user_id: None,
            username: None,
            wizard: RegistrationWizard::new(require_address),
        }
    }

    /// A session already bound to a user, skipping the credential check
    pub fn for_user(user: &User) -> Self {
        let mut session = Session::new(true);
        session.bind(user);
        session
    }

    fn bind(&mut self, user: &User) {
        self.user_id = Some(user.id);
        self.username = Some(user.username.clone());
    }

    pub fn is_logged_in(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn require_user(&self) -> Result<i64> {
        self.user_id.ok_or(HeySaveError::NotAuthenticated)
    }

    /// Name recorded on audit events
    pub fn actor(&self) -> &str {
        self.username.as_deref().unwrap_or("anonymous")
    }

    /// Exact username match plus password check. A failed attempt leaves
    /// the session as it was.
    pub fn login(&mut self, conn: &Connection, username: &str, password: &str) -> Result<User> {
        let user = match db::find_user_by_username(conn, username)? {
            Some(user) if verify_password(password, &user.password) => user,
            _ => {
                warn!(username, "login rejected");
                return Err(HeySaveError::InvalidCredentials);
            }
        };

        self.bind(&user);
        info!(user_id = user.id, username, "login succeeded");
        Ok(user)
    }

    pub fn logout(&mut self) {
        if let Some(user_id) = self.user_id.take() {
            info!(user_id, "logout");
        }
        self.username = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_conn;

    fn step1() -> Step1Input {
        Step1Input {
            username: "ana".into(),
            password: "clave#1".into(),
            display_name: "Ana Torres".into(),
            national_id: "12345678".into(),
        }
    }

    fn step2() -> Step2Input {
        Step2Input {
            country: Some("Peru".into()),
            address: Some("Av. Arequipa 123".into()),
            postal_code: Some("15001".into()),
            card_number: "4551 2345 6789 0123".into(),
            expiry: "1228".into(),
            cvv: "123".into(),
        }
    }

    fn register(conn: &Connection) -> i64 {
        let mut wizard = RegistrationWizard::new(true);
        wizard.submit_step1(conn, &step1()).unwrap();
        wizard.submit_step2(conn, &step2()).unwrap()
    }

    #[test]
    fn test_password_strength() {
        assert!(is_strong_password("abc12!"));
        assert!(is_strong_password("contraseña"));
        assert!(!is_strong_password("abc1!"));
        assert!(!is_strong_password("abcdef12"));
        assert!(!is_strong_password("abc 123 "));
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("clave#1").unwrap();
        assert_ne!(hash, "clave#1");
        assert!(verify_password("clave#1", &hash));
        assert!(!verify_password("clave#2", &hash));
    }

    #[test]
    fn test_legacy_cleartext_verify() {
        assert!(verify_password("old-pass!", "old-pass!"));
        assert!(!verify_password("old-pass", "old-pass!"));
    }

    #[test]
    fn test_step1_collects_all_errors() {
        let conn = test_conn();
        let mut wizard = RegistrationWizard::new(true);

        let err = wizard
            .submit_step1(
                &conn,
                &Step1Input {
                    username: "".into(),
                    password: "abc".into(),
                    display_name: "Ana".into(),
                    national_id: "1234".into(),
                },
            )
            .unwrap_err();

        assert_eq!(
            err.messages(),
            vec![MSG_WEAK_PASSWORD, MSG_BAD_NATIONAL_ID, MSG_MISSING_DATA]
        );
        assert_eq!(wizard.step_number(), 1);
    }

    #[test]
    fn test_step1_normalizes_national_id() {
        let conn = test_conn();
        let mut wizard = RegistrationWizard::new(true);
        let mut input = step1();
        input.national_id = "1234-5678".into();

        wizard.submit_step1(&conn, &input).unwrap();
        assert_eq!(wizard.pending().unwrap().national_id, "12345678");
        assert_ne!(wizard.pending().unwrap().password_hash, "clave#1");
    }

    #[test]
    fn test_full_registration_and_login() {
        let conn = test_conn();
        let user_id = register(&conn);

        let user = db::get_user(&conn, user_id).unwrap();
        assert_eq!(user.bank, "BCP");
        assert_eq!(user.address.as_deref(), Some("Av. Arequipa 123"));
        assert_eq!(user.balance, 0.0);

        let mut session = Session::new(true);
        assert!(!session.is_logged_in());
        let logged = session.login(&conn, "ana", "clave#1").unwrap();
        assert_eq!(logged.id, user_id);
        assert_eq!(session.require_user().unwrap(), user_id);

        session.logout();
        assert!(matches!(session.require_user(), Err(HeySaveError::NotAuthenticated)));
        assert_eq!(session.actor(), "anonymous");
    }

    #[test]
    fn test_wizard_resets_after_success() {
        let conn = test_conn();
        let mut wizard = RegistrationWizard::new(true);
        wizard.submit_step1(&conn, &step1()).unwrap();
        assert_eq!(wizard.step_number(), 2);

        wizard.submit_step2(&conn, &step2()).unwrap();
        assert_eq!(wizard.step(), &WizardStep::Step1);
        assert!(wizard.pending().is_none());
    }

    #[test]
    fn test_username_taken() {
        let conn = test_conn();
        register(&conn);

        let mut wizard = RegistrationWizard::new(true);
        let err = wizard.submit_step1(&conn, &step1()).unwrap_err();
        assert!(matches!(err, HeySaveError::UsernameTaken(ref u) if u == "ana"));
        assert_eq!(wizard.step_number(), 1);
    }

    #[test]
    fn test_username_taken_between_steps() {
        let conn = test_conn();
        let mut first = RegistrationWizard::new(true);
        let mut second = RegistrationWizard::new(true);
        first.submit_step1(&conn, &step1()).unwrap();
        second.submit_step1(&conn, &step1()).unwrap();

        first.submit_step2(&conn, &step2()).unwrap();
        let err = second.submit_step2(&conn, &step2()).unwrap_err();
        assert!(matches!(err, HeySaveError::UsernameTaken(_)));
    }

    #[test]
    fn test_step2_validation() {
        let conn = test_conn();
        let mut wizard = RegistrationWizard::new(true);
        wizard.submit_step1(&conn, &step1()).unwrap();

        let err = wizard
            .submit_step2(
                &conn,
                &Step2Input {
                    country: None,
                    address: Some("  ".into()),
                    postal_code: Some("15001".into()),
                    card_number: "4551 2345".into(),
                    expiry: "13/28".into(),
                    cvv: "12".into(),
                },
            )
            .unwrap_err();

        assert_eq!(
            err.messages(),
            vec![MSG_MISSING_ADDRESS, MSG_BAD_CARD, MSG_BAD_EXPIRY, MSG_BAD_CVV]
        );
        // Still at step 2 with the pending data intact
        assert_eq!(wizard.step_number(), 2);
        assert!(!db::username_exists(&conn, "ana").unwrap());
    }

    #[test]
    fn test_card_only_variant() {
        let conn = test_conn();
        let mut wizard = RegistrationWizard::new(false);
        wizard.submit_step1(&conn, &step1()).unwrap();

        let user_id = wizard
            .submit_step2(
                &conn,
                &Step2Input {
                    card_number: "1234 5678 9012 3456".into(),
                    expiry: "01/30".into(),
                    cvv: "1234".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        let user = db::get_user(&conn, user_id).unwrap();
        assert_eq!(user.bank, "Card Genérico");
        assert!(user.country.is_none());
    }

    #[test]
    fn test_wizard_out_of_order() {
        let conn = test_conn();
        let mut wizard = RegistrationWizard::new(true);
        assert!(matches!(
            wizard.submit_step2(&conn, &step2()),
            Err(HeySaveError::WrongStep { .. })
        ));

        wizard.submit_step1(&conn, &step1()).unwrap();
        assert!(matches!(
            wizard.submit_step1(&conn, &step1()),
            Err(HeySaveError::WrongStep { .. })
        ));

        wizard.back();
        assert_eq!(wizard.step_number(), 1);
    }

    #[test]
    fn test_login_failures_leave_session_unchanged() {
        let conn = test_conn();
        register(&conn);
        let mut session = Session::new(true);

        assert!(matches!(
            session.login(&conn, "ana", "wrong!!"),
            Err(HeySaveError::InvalidCredentials)
        ));
        assert!(matches!(
            session.login(&conn, "nobody", "clave#1"),
            Err(HeySaveError::InvalidCredentials)
        ));
        assert!(!session.is_logged_in());
    }

    #[test]
    fn test_login_legacy_cleartext_row() {
        let conn = test_conn();
        db::insert_user(
            &conn,
            &NewUser {
                username: "legacy",
                password: "plain#pw",
                display_name: "Legacy",
                national_id: "11112222",
                bank: "BBVA",
                country: None,
                address: None,
                postal_code: None,
            },
        )
        .unwrap();

        let mut session = Session::new(true);
        assert!(session.login(&conn, "legacy", "plain#pw").is_ok());
        assert_eq!(session.username(), Some("legacy"));
    }

    #[test]
    fn test_session_serializes() {
        let mut session = Session::new(false);
        session.user_id = Some(3);
        session.username = Some("ana".into());

        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_id(), Some(3));
        assert_eq!(back.wizard.step_number(), 1);
    }

    #[test]
    fn test_registration_event_logged() {
        let conn = test_conn();
        let user_id = register(&conn);

        let events = db::get_events_for_entity(&conn, "user", &user_id.to_string()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "user_registered");
        assert_eq!(events[0].data["bank"], "BCP");
    }
}
