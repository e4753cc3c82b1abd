//! `stockpile-auth` — authentication/authorization boundary (zero-trust).
//!
//! Claims validation and policy checks are pure; the only IO-adjacent piece
//! is HS256 signature verification in [`jwt`].

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod user;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
pub use permissions::Permission;
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
pub use user::{User, UserCommand, UserEvent, UserId, UserStatus};
