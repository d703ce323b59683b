//! OAuth token lifecycle.
//!
//! Workers never read token columns directly; they ask the manager for a
//! valid access token and it refreshes behind the scenes when the token is
//! inside the expiry margin.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::common::AccountId;
use crate::domains::accounts::models::connected_account::{AccountStatus, ConnectedAccount};
use crate::kernel::{Kernel, OAuthError};

/// Refresh when the token expires within this window, so a token that is
/// valid now cannot expire mid-request.
const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The account cannot produce a valid token without the user
    /// re-authorizing. Callers release work instead of burning retries.
    #[error("account requires re-authorization")]
    AuthExpired,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub struct TokenManager {
    kernel: Arc<Kernel>,
}

impl TokenManager {
    pub fn new(kernel: Arc<Kernel>) -> Self {
        Self { kernel }
    }

    /// Return a decrypted access token guaranteed valid for at least the
    /// refresh margin, refreshing first if needed.
    ///
    /// Concurrent calls for the same account serialize on a row lock; the
    /// loser of the race re-checks after acquiring it and finds the token
    /// already fresh, so upstream sees one refresh, not two.
    pub async fn valid_access_token(&self, account_id: AccountId) -> Result<String, TokenError> {
        let pool = &self.kernel.db_pool;
        let now = Utc::now();

        let account = ConnectedAccount::find_by_id(account_id, pool)
            .await?
            .with_context(|| format!("connected account {account_id} not found"))?;

        if !account.status.is_syncable() {
            return Err(TokenError::AuthExpired);
        }

        if !needs_refresh(&account, now) {
            return Ok(self.decrypt_access(&account)?);
        }

        let mut tx = pool.begin().await.context("begin token refresh tx")?;

        let account = ConnectedAccount::lock_for_refresh(account_id, &mut *tx)
            .await?
            .with_context(|| format!("connected account {account_id} disappeared"))?;

        // Another worker may have refreshed while we waited on the lock.
        if !needs_refresh(&account, Utc::now()) {
            tx.commit().await.context("commit token refresh tx")?;
            return Ok(self.decrypt_access(&account)?);
        }

        if !account.platform.uses_refresh_tokens() {
            // No refresh path: the connection is simply over until the
            // user re-authorizes.
            ConnectedAccount::set_status(account_id, AccountStatus::TokenExpired, &mut *tx).await?;
            tx.commit().await.context("commit token refresh tx")?;
            warn!(
                account_id = %account_id,
                platform = %account.platform,
                "token expired with no refresh path, account needs re-authorization"
            );
            return Err(TokenError::AuthExpired);
        }

        let refresh_token_enc = account
            .refresh_token_enc
            .as_deref()
            .ok_or(TokenError::AuthExpired)?;
        let refresh_token = self
            .kernel
            .token_cipher
            .decrypt(refresh_token_enc)
            .context("decrypt refresh token")?;

        match self.refresh_with_retry(&account, &refresh_token).await {
            Ok(grant) => {
                let access_token_enc = self
                    .kernel
                    .token_cipher
                    .encrypt(&grant.access_token)
                    .context("encrypt access token")?;
                let refresh_token_enc = grant
                    .refresh_token
                    .as_deref()
                    .map(|token| self.kernel.token_cipher.encrypt(token))
                    .transpose()
                    .context("encrypt refresh token")?;

                ConnectedAccount::store_tokens(
                    account_id,
                    &access_token_enc,
                    refresh_token_enc.as_deref(),
                    grant.expires_at,
                    &mut *tx,
                )
                .await?;
                tx.commit().await.context("commit token refresh tx")?;

                info!(account_id = %account_id, platform = %account.platform, "refreshed access token");
                Ok(grant.access_token)
            }
            Err(OAuthError::InvalidGrant) => {
                ConnectedAccount::set_status(account_id, AccountStatus::Disconnected, &mut *tx)
                    .await?;
                tx.commit().await.context("commit token refresh tx")?;
                warn!(
                    account_id = %account_id,
                    platform = %account.platform,
                    "refresh token rejected, account disconnected"
                );
                Err(TokenError::AuthExpired)
            }
            Err(OAuthError::Transient(message)) => {
                tx.rollback().await.context("rollback token refresh tx")?;
                Err(TokenError::Internal(anyhow::anyhow!(
                    "token refresh failed: {message}"
                )))
            }
        }
    }

    /// Call the refresh endpoint, retrying an `invalid_grant` once against
    /// a re-read of the stored refresh token. An out-of-band refresh may
    /// have rotated the token after our initial read; if the stored value
    /// changed, the second attempt uses it.
    async fn refresh_with_retry(
        &self,
        account: &ConnectedAccount,
        refresh_token: &str,
    ) -> Result<crate::kernel::TokenGrant, OAuthError> {
        match self
            .kernel
            .oauth
            .refresh(account.platform, refresh_token)
            .await
        {
            Err(OAuthError::InvalidGrant) => {
                let latest = ConnectedAccount::find_by_id(account.id, &self.kernel.db_pool)
                    .await
                    .ok()
                    .flatten();
                let rotated = latest
                    .and_then(|a| a.refresh_token_enc)
                    .map(|enc| self.kernel.token_cipher.decrypt(&enc))
                    .transpose()
                    .unwrap_or_default()
                    .filter(|token| token != refresh_token);

                match rotated {
                    Some(token) => self.kernel.oauth.refresh(account.platform, &token).await,
                    None => Err(OAuthError::InvalidGrant),
                }
            }
            other => other,
        }
    }

    fn decrypt_access(&self, account: &ConnectedAccount) -> anyhow::Result<String> {
        self.kernel
            .token_cipher
            .decrypt(&account.access_token_enc)
            .context("decrypt access token")
    }
}

fn needs_refresh(account: &ConnectedAccount, now: DateTime<Utc>) -> bool {
    match account.token_expires_at {
        Some(expires_at) => expires_at <= now + Duration::minutes(REFRESH_MARGIN_MINUTES),
        // No expiry recorded: treat the token as long-lived.
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Platform, UserId};

    fn account_expiring_in(minutes: i64) -> ConnectedAccount {
        ConnectedAccount::builder()
            .user_id(UserId::new())
            .platform(Platform::Strava)
            .access_token_enc("enc:tok".to_string())
            .token_expires_at(Utc::now() + Duration::minutes(minutes))
            .build()
    }

    #[test]
    fn refresh_inside_margin_only() {
        let now = Utc::now();
        assert!(needs_refresh(&account_expiring_in(3), now));
        assert!(needs_refresh(&account_expiring_in(-1), now));
        assert!(!needs_refresh(&account_expiring_in(30), now));
    }

    #[test]
    fn no_expiry_means_no_refresh() {
        let mut account = account_expiring_in(3);
        account.token_expires_at = None;
        assert!(!needs_refresh(&account, Utc::now()));
    }
}
