// Kernel - core infrastructure with all dependencies
//
// The Kernel holds the database pool and every external boundary the
// pipeline talks to, exposed via traits for testability.

use sqlx::PgPool;
use std::sync::Arc;

use super::traits::{
    BaseMediaFetcher, BaseOAuthClient, BaseObjectStorage, BasePlatformGateway, BaseTokenCipher,
};

/// Kernel holds all pipeline dependencies
pub struct Kernel {
    pub db_pool: PgPool,
    pub gateway: Arc<dyn BasePlatformGateway>,
    pub oauth: Arc<dyn BaseOAuthClient>,
    pub media_fetcher: Arc<dyn BaseMediaFetcher>,
    pub object_storage: Arc<dyn BaseObjectStorage>,
    pub token_cipher: Arc<dyn BaseTokenCipher>,
}

impl Kernel {
    /// Creates a new Kernel with the given dependencies
    pub fn new(
        db_pool: PgPool,
        gateway: Arc<dyn BasePlatformGateway>,
        oauth: Arc<dyn BaseOAuthClient>,
        media_fetcher: Arc<dyn BaseMediaFetcher>,
        object_storage: Arc<dyn BaseObjectStorage>,
        token_cipher: Arc<dyn BaseTokenCipher>,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            oauth,
            media_fetcher,
            object_storage,
            token_cipher,
        }
    }
}
