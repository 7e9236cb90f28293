pub mod credential;
pub mod user;
pub mod user_data;

pub use credential::*;
pub use user::*;
pub use user_data::*;
