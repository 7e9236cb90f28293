pub mod account;
pub mod health;
pub mod passkey;
pub mod sync;
