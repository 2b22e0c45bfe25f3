pub mod middleware;
pub mod password;
pub mod token;

pub use middleware::auth_middleware;
pub use token::{AccessTokenKind, AccessTokenPayload, SessionCookiePayload, TokenService};
