pub mod connected_account;
