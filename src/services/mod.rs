pub mod challenge;
pub mod credentials;
pub mod passkey;
pub mod sync;
pub mod token;
pub mod user_data;
pub mod users;

pub use challenge::ChallengeStore;
pub use credentials::CredentialStore;
pub use passkey::PasskeyService;
pub use sync::SyncService;
pub use token::TokenCodec;
pub use user_data::UserDataStore;
pub use users::UserService;
