use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Usage: {program} <input.xlsx> <output.csv>")]
    Usage { program: String },

    #[error("workbook has no worksheets")]
    NoWorksheet,

    #[error("Invalid datetime value {0}")]
    InvalidDatetime(String),
}
