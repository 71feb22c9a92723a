pub mod decision;
pub mod document;
pub mod enums;

pub use decision::*;
pub use document::*;
pub use enums::*;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },
}
