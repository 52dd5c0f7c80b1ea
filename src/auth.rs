//! Auth-domain models: scope sets, token secrets, and the persisted token set.

pub mod scope;
pub mod token;

pub use scope::*;
pub use token::*;
