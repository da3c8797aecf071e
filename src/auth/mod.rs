//! Credentials and bearer sessions.

pub mod notify;
pub mod password;
pub mod revocation;
pub mod session;
pub mod token;

pub use self::notify::{LogResetNotifier, ResetNotice, ResetNotifier};
pub use self::revocation::RevocationStore;
pub use self::session::{Principal, SessionConfig, SessionManager, bearer_token};
pub use self::token::{Claims, IssuedToken, TokenError, TokenIssuer, TokenPurpose};
