pub mod company;
pub mod credentials;
pub mod error;
mod literal;
pub mod predicate;
pub mod status;

pub use company::Company;
pub use credentials::Credentials;
pub use error::{CoreError, Result};
pub use predicate::{FieldKind, FilterPredicate, PropertyMatch, ValueType};
pub use status::{ErrorCode, LoginStatus};
