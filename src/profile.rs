// 👤 Profile - identity details, photo and redemption history

use crate::auth::Session;
use crate::db::{self, Event, RedeemedReward};
use crate::entities::card::mask_tail;
use crate::error::{HeySaveError, Result};
use crate::loyalty::{self, TierInfo};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;
pub const ACTIVITY_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub username: String,
    pub display_name: String,
    pub national_id: String,
    /// Last four digits of the national ID, as shown on the balance card
    pub masked_id: String,
    pub bank: String,
    pub tier: TierInfo,
    pub points: i64,
    pub country: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub has_photo: bool,
    /// Most-recent-first
    pub redemptions: Vec<RedeemedReward>,
    /// Latest audit events caused by this user
    pub activity: Vec<Event>,
}

pub fn profile(conn: &Connection, session: &Session) -> Result<Profile> {
    let user_id = session.require_user()?;
    let user = db::get_user(conn, user_id)?;

    Ok(Profile {
        masked_id: mask_tail(&user.national_id, 4),
        tier: loyalty::compute_tier(user.points),
        has_photo: user.photo.as_ref().map_or(false, |p| !p.is_empty()),
        redemptions: db::get_redeemed_rewards(conn, user_id)?,
        activity: db::get_activity(conn, &user.username, ACTIVITY_LIMIT)?,
        username: user.username,
        display_name: user.display_name,
        national_id: user.national_id,
        bank: user.bank,
        points: user.points,
        country: user.country,
        address: user.address,
        postal_code: user.postal_code,
    })
}

pub fn photo(conn: &Connection, session: &Session) -> Result<Option<Vec<u8>>> {
    let user = db::get_user(conn, session.require_user()?)?;
    Ok(user.photo)
}

pub fn update_photo(conn: &Connection, session: &Session, bytes: &[u8]) -> Result<()> {
    let user_id = session.require_user()?;

    if bytes.is_empty() {
        return Err(HeySaveError::validation("Photo is empty."));
    }
    if bytes.len() > MAX_PHOTO_BYTES {
        return Err(HeySaveError::validation("Photo is larger than 5 MiB."));
    }

    db::set_photo(conn, user_id, Some(bytes))?;
    db::insert_event(
        conn,
        &Event::new(
            "photo_updated",
            "user",
            user_id,
            serde_json::json!({ "bytes": bytes.len() }),
            session.actor(),
        ),
    )?;
    info!(user_id, bytes = bytes.len(), "profile photo updated");
    Ok(())
}

pub fn clear_photo(conn: &Connection, session: &Session) -> Result<()> {
    let user_id = session.require_user()?;
    db::set_photo(conn, user_id, None)?;
    info!(user_id, "profile photo cleared");
    Ok(())
}
