//! Connected accounts and OAuth token lifecycle.

pub mod models;
pub mod token_manager;

pub use models::connected_account::{AccountStatus, ConnectedAccount, ERROR_FLAG_THRESHOLD};
pub use token_manager::{TokenError, TokenManager};
