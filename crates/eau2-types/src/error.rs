use thiserror::Error;

use crate::table::ElementType;

/// Errors produced by table accessors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("column index {col} out of range ({ncols} columns)")]
    ColumnOutOfRange { col: usize, ncols: usize },

    #[error("row index {row} out of range ({nrows} rows)")]
    RowOutOfRange { row: usize, nrows: usize },

    #[error("column {col} holds {actual} values, not {requested}")]
    TypeMismatch {
        col: usize,
        requested: &'static str,
        actual: ElementType,
    },
}
