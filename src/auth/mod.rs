//! Authentication: resolves the acting user from a bearer token

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtService};
pub use middleware::{extract_token, jwt_auth_middleware, AuthContext};
