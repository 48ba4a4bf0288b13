//! API response types and request validation

pub mod response;
pub mod validation;

pub use response::{Attachment, Created};
pub use validation::ValidationErrors;
