//! Database Repository
//!
//! Data access layer for portfolios, currency items, users, and memberships.

use super::models::*;
use super::{DbPool, StoreError, DEFAULT_TITLE};
use tracing::{debug, error};

/// Trim a client-supplied title, falling back to the default when the
/// result is empty.
fn normalize_title(title: Option<&str>) -> &str {
    match title.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => DEFAULT_TITLE,
    }
}

/// Portfolio repository
pub struct PortfolioRepository {
    pool: DbPool,
}

impl PortfolioRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a new portfolio
    pub async fn create(&self, title: Option<&str>) -> Result<PortfolioRecord, StoreError> {
        let record = sqlx::query_as::<_, PortfolioRecord>(
            "INSERT INTO portfolios (title) VALUES (?1) RETURNING *",
        )
        .bind(normalize_title(title))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create portfolio: {}", e);
            StoreError::from(e)
        })?;

        debug!("Created portfolio: {}", record.id);
        Ok(record)
    }

    /// Get portfolio by ID
    pub async fn get(&self, id: i64) -> Result<Option<PortfolioRecord>, StoreError> {
        let record =
            sqlx::query_as::<_, PortfolioRecord>("SELECT * FROM portfolios WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to get portfolio {}: {}", id, e);
                    StoreError::from(e)
                })?;

        Ok(record)
    }

    /// Update the portfolio title. An empty or missing title resets to the
    /// default.
    pub async fn set_title(
        &self,
        id: i64,
        title: Option<&str>,
    ) -> Result<PortfolioRecord, StoreError> {
        let record = sqlx::query_as::<_, PortfolioRecord>(
            "UPDATE portfolios SET title = ?1 WHERE id = ?2 RETURNING *",
        )
        .bind(normalize_title(title))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to set title for portfolio {}: {}", id, e);
            StoreError::from(e)
        })?
        .ok_or(StoreError::NotFound)?;

        debug!("Updated title for portfolio {}", id);
        Ok(record)
    }

    /// Register a user as a member of a portfolio.
    ///
    /// A single statement decides ownership: the first member of a portfolio
    /// becomes its owner, and a returning member is promoted when the
    /// portfolio currently has no owner. Concurrent joins cannot mint two
    /// owners because the subquery and the write commit together, with the
    /// partial unique index as backstop.
    pub async fn add_member(
        &self,
        portfolio_id: i64,
        user_fb_id: i64,
    ) -> Result<MembershipRecord, StoreError> {
        let record = sqlx::query_as::<_, MembershipRecord>(
            r#"
            INSERT INTO memberships (portfolio_id, user_fb_id, owner)
            VALUES (
                ?1, ?2,
                NOT EXISTS (SELECT 1 FROM memberships WHERE portfolio_id = ?1 AND owner = 1)
            )
            ON CONFLICT (portfolio_id, user_fb_id) DO UPDATE
            SET owner = owner
                OR NOT EXISTS (SELECT 1 FROM memberships WHERE portfolio_id = ?1 AND owner = 1)
            RETURNING *
            "#,
        )
        .bind(portfolio_id)
        .bind(user_fb_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Failed to add member {} to portfolio {}: {}",
                user_fb_id, portfolio_id, e
            );
            StoreError::from(e)
        })?;

        debug!(
            "Member {} in portfolio {} (owner: {})",
            user_fb_id, portfolio_id, record.owner
        );
        Ok(record)
    }

    /// Get all members of a portfolio
    pub async fn get_members(
        &self,
        portfolio_id: i64,
    ) -> Result<Vec<MembershipRecord>, StoreError> {
        let records = sqlx::query_as::<_, MembershipRecord>(
            "SELECT * FROM memberships WHERE portfolio_id = ?1 ORDER BY id",
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get members of portfolio {}: {}", portfolio_id, e);
            StoreError::from(e)
        })?;

        Ok(records)
    }

    /// Get the owning membership of a portfolio, if it has one
    pub async fn get_owner(
        &self,
        portfolio_id: i64,
    ) -> Result<Option<MembershipRecord>, StoreError> {
        let record = sqlx::query_as::<_, MembershipRecord>(
            "SELECT * FROM memberships WHERE portfolio_id = ?1 AND owner = 1",
        )
        .bind(portfolio_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get owner of portfolio {}: {}", portfolio_id, e);
            StoreError::from(e)
        })?;

        Ok(record)
    }

    /// Transfer portfolio ownership to the given user.
    ///
    /// Demote and promote run in one transaction so no interleaving can
    /// observe zero owners or two owners.
    pub async fn set_owner(
        &self,
        portfolio_id: i64,
        user_fb_id: i64,
    ) -> Result<MembershipRecord, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        sqlx::query("INSERT INTO users (fb_id) VALUES (?1) ON CONFLICT (fb_id) DO NOTHING")
            .bind(user_fb_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;

        sqlx::query(
            "UPDATE memberships SET owner = 0 \
             WHERE portfolio_id = ?1 AND owner = 1 AND user_fb_id != ?2",
        )
        .bind(portfolio_id)
        .bind(user_fb_id)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let record = sqlx::query_as::<_, MembershipRecord>(
            "INSERT INTO memberships (portfolio_id, user_fb_id, owner) VALUES (?1, ?2, 1) \
             ON CONFLICT (portfolio_id, user_fb_id) DO UPDATE SET owner = 1 \
             RETURNING *",
        )
        .bind(portfolio_id)
        .bind(user_fb_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        tx.commit().await.map_err(|e| {
            error!(
                "Failed to set owner {} for portfolio {}: {}",
                user_fb_id, portfolio_id, e
            );
            StoreError::from(e)
        })?;

        debug!("Portfolio {} owner set to {}", portfolio_id, user_fb_id);
        Ok(record)
    }
}

/// Currency repository
pub struct CurrencyRepository {
    pool: DbPool,
}

impl CurrencyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a new currency item
    pub async fn create(&self, currency: NewCurrency) -> Result<CurrencyRecord, StoreError> {
        let record = sqlx::query_as::<_, CurrencyRecord>(
            r#"
            INSERT INTO currencies (
                portfolio_id, name, ticker, value, value_currency, owner_fb_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING *
            "#,
        )
        .bind(currency.portfolio_id)
        .bind(&currency.name)
        .bind(&currency.ticker)
        .bind(currency.value)
        .bind(&currency.value_currency)
        .bind(currency.owner_fb_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create currency: {}", e);
            StoreError::from(e)
        })?;

        debug!(
            "Created currency {} ({}) in portfolio {}",
            record.id, record.ticker, record.portfolio_id
        );
        Ok(record)
    }

    /// Apply a merge-patch to a currency item.
    ///
    /// Only fields present in the patch change. The portfolio ID is part of
    /// the WHERE clause so an item can never be edited through another
    /// portfolio.
    pub async fn update(
        &self,
        id: i64,
        portfolio_id: i64,
        patch: CurrencyPatch,
    ) -> Result<CurrencyRecord, StoreError> {
        let (set_completer, completer) = match patch.completer_fb_id {
            Some(value) => (true, value),
            None => (false, None),
        };

        let record = sqlx::query_as::<_, CurrencyRecord>(
            r#"
            UPDATE currencies
            SET name = COALESCE(?1, name),
                ticker = COALESCE(?2, ticker),
                value = COALESCE(?3, value),
                value_currency = COALESCE(?4, value_currency),
                completer_fb_id = CASE WHEN ?5 THEN ?6 ELSE completer_fb_id END
            WHERE id = ?7 AND portfolio_id = ?8
            RETURNING *
            "#,
        )
        .bind(&patch.name)
        .bind(&patch.ticker)
        .bind(patch.value)
        .bind(&patch.value_currency)
        .bind(set_completer)
        .bind(completer)
        .bind(id)
        .bind(portfolio_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update currency {}: {}", id, e);
            StoreError::from(e)
        })?
        .ok_or(StoreError::NotFound)?;

        debug!("Updated currency {} in portfolio {}", id, portfolio_id);
        Ok(record)
    }

    /// Get currency item by ID
    pub async fn get(&self, id: i64) -> Result<Option<CurrencyRecord>, StoreError> {
        let record = sqlx::query_as::<_, CurrencyRecord>("SELECT * FROM currencies WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get currency {}: {}", id, e);
                StoreError::from(e)
            })?;

        Ok(record)
    }

    /// Get all currency items of a portfolio, oldest first
    pub async fn get_for_portfolio(
        &self,
        portfolio_id: i64,
    ) -> Result<Vec<CurrencyRecord>, StoreError> {
        let records = sqlx::query_as::<_, CurrencyRecord>(
            "SELECT * FROM currencies WHERE portfolio_id = ?1 ORDER BY id",
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Failed to get currencies for portfolio {}: {}",
                portfolio_id, e
            );
            StoreError::from(e)
        })?;

        Ok(records)
    }
}

/// User repository
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Look up a user, creating the row on first sight
    pub async fn find_or_create(&self, fb_id: i64) -> Result<UserRecord, StoreError> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (fb_id) VALUES (?1) \
             ON CONFLICT (fb_id) DO UPDATE SET fb_id = excluded.fb_id \
             RETURNING *",
        )
        .bind(fb_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find or create user {}: {}", fb_id, e);
            StoreError::from(e)
        })?;

        Ok(record)
    }

    /// Get user by platform ID
    pub async fn get(&self, fb_id: i64) -> Result<Option<UserRecord>, StoreError> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE fb_id = ?1")
            .bind(fb_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get user {}: {}", fb_id, e);
                StoreError::from(e)
            })?;

        Ok(record)
    }
}
