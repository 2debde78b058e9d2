//! Database Models
//!
//! Persistent data structures for portfolios, currency items, users, and
//! memberships. Records serialize in camelCase because they go to the
//! webview client as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Portfolio record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioRecord {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// User record in database
///
/// Identities come from the messaging platform; this table only remembers
/// which ones we have seen.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub fb_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Currency item record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyRecord {
    pub id: i64,
    pub portfolio_id: i64,
    pub name: String,
    pub ticker: String,
    pub value: f64,
    pub value_currency: String,
    pub owner_fb_id: i64,
    pub completer_fb_id: Option<i64>, // NULL means the entry is still open
    pub created_at: DateTime<Utc>,
}

/// Membership record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    pub id: i64,
    pub portfolio_id: i64,
    pub user_fb_id: i64,
    pub owner: bool,
    pub created_at: DateTime<Utc>,
}

/// Create currency input
#[derive(Debug, Clone)]
pub struct NewCurrency {
    pub portfolio_id: i64,
    pub name: String,
    pub ticker: String,
    pub value: f64,
    pub value_currency: String,
    pub owner_fb_id: i64,
}

/// Merge-patch input for currency updates.
///
/// `None` fields are left untouched. `completer_fb_id` is tri-state:
/// `None` preserves, `Some(None)` clears (entry re-opened), `Some(Some(id))`
/// marks completed by that user.
#[derive(Debug, Clone, Default)]
pub struct CurrencyPatch {
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub value: Option<f64>,
    pub value_currency: Option<String>,
    pub completer_fb_id: Option<Option<i64>>,
}
