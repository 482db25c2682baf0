pub mod authenticator;
pub mod claims;
pub mod converter;
pub mod decoder;
pub mod factory;
pub mod identity;
pub mod issuers;
pub mod keys;

pub use authenticator::CallAuthenticator;
pub use factory::build_authenticator;
pub use identity::{Authenticated, Authority, Identity, Principal};
