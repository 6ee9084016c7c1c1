pub mod auth;
pub mod client;

pub use auth::{owner_auth_middleware, OwnerClaims};
pub use client::ClientId;
