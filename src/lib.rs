pub mod convert;
pub mod error;
pub mod metadata;
pub mod timestamp;
pub mod workbook;

pub use convert::{Options, convert};
pub use error::ConvertError;
