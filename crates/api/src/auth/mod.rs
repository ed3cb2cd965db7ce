//! Authentication module for collabsphere

pub mod jwt;

use collabsphere_shared::Identity;

pub use jwt::{Claims, JwtError, JwtManager};

/// Turns a bearer token into a verified user identity
pub trait IdentityVerifier: Send + Sync {
    fn verify_token(&self, token: &str) -> Result<Identity, JwtError>;
}
