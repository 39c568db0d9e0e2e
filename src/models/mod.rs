pub mod role;
pub mod user;

pub use role::{Role, RoleParseError};
pub use user::{HashedPassword, NewUser, User, UserUpdate, hash_password, is_hashed, verify_password};
