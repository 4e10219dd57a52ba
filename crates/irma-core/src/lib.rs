pub mod candidates;
pub mod crypto;
pub mod disjunction;
pub mod error;
pub mod metadata;
pub mod request;
pub mod traits;
pub mod trust_store;
pub mod types;

pub use candidates::*;
pub use crypto::*;
pub use disjunction::*;
pub use error::*;
pub use metadata::*;
pub use request::*;
pub use traits::*;
pub use trust_store::*;
pub use types::*;
