pub mod jwt;

pub use jwt::{extract_token_from_request, AuthenticatedUser, Claims, JwtIssuer, JwtValidator};
