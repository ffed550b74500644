use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Scalar type carried by every element of a [`Column`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    Bool,
    Float,
    Double,
    String,
}

impl ElementType {
    /// Encoded width of one element, or `None` for variable-width strings.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::U8 | Self::I8 | Self::Bool => Some(1),
            Self::U16 | Self::I16 => Some(2),
            Self::U32 | Self::I32 | Self::Float => Some(4),
            Self::U64 | Self::I64 | Self::Double => Some(8),
            Self::String => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::U64 => "u64",
            Self::I64 => "i64",
            Self::Bool => "bool",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed, growable column of values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Column {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    Bool(Vec<bool>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<String>),
}

impl Column {
    /// An empty column of the given element type.
    pub fn empty(ty: ElementType) -> Self {
        match ty {
            ElementType::U8 => Self::U8(Vec::new()),
            ElementType::I8 => Self::I8(Vec::new()),
            ElementType::U16 => Self::U16(Vec::new()),
            ElementType::I16 => Self::I16(Vec::new()),
            ElementType::U32 => Self::U32(Vec::new()),
            ElementType::I32 => Self::I32(Vec::new()),
            ElementType::U64 => Self::U64(Vec::new()),
            ElementType::I64 => Self::I64(Vec::new()),
            ElementType::Bool => Self::Bool(Vec::new()),
            ElementType::Float => Self::Float(Vec::new()),
            ElementType::Double => Self::Double(Vec::new()),
            ElementType::String => Self::String(Vec::new()),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Self::U8(_) => ElementType::U8,
            Self::I8(_) => ElementType::I8,
            Self::U16(_) => ElementType::U16,
            Self::I16(_) => ElementType::I16,
            Self::U32(_) => ElementType::U32,
            Self::I32(_) => ElementType::I32,
            Self::U64(_) => ElementType::U64,
            Self::I64(_) => ElementType::I64,
            Self::Bool(_) => ElementType::Bool,
            Self::Float(_) => ElementType::Float,
            Self::Double(_) => ElementType::Double,
            Self::String(_) => ElementType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::I8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer value at `row`, widened to `i64`. `None` for non-integer
    /// columns, out-of-range rows, and `u64` values above `i64::MAX`.
    pub fn get_i64(&self, row: usize) -> Option<i64> {
        match self {
            Self::U8(v) => v.get(row).map(|x| i64::from(*x)),
            Self::I8(v) => v.get(row).map(|x| i64::from(*x)),
            Self::U16(v) => v.get(row).map(|x| i64::from(*x)),
            Self::I16(v) => v.get(row).map(|x| i64::from(*x)),
            Self::U32(v) => v.get(row).map(|x| i64::from(*x)),
            Self::I32(v) => v.get(row).map(|x| i64::from(*x)),
            Self::U64(v) => v.get(row).and_then(|x| i64::try_from(*x).ok()),
            Self::I64(v) => v.get(row).copied(),
            _ => None,
        }
    }

    pub fn get_f64(&self, row: usize) -> Option<f64> {
        match self {
            Self::Float(v) => v.get(row).map(|x| f64::from(*x)),
            Self::Double(v) => v.get(row).copied(),
            _ => None,
        }
    }

    pub fn get_bool(&self, row: usize) -> Option<bool> {
        match self {
            Self::Bool(v) => v.get(row).copied(),
            _ => None,
        }
    }

    pub fn get_str(&self, row: usize) -> Option<&str> {
        match self {
            Self::String(v) => v.get(row).map(String::as_str),
            _ => None,
        }
    }

    /// Render the column as `"1, 2, 3"`.
    pub fn render(&self) -> String {
        fn join<T: fmt::Display>(values: &[T]) -> String {
            values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }
        match self {
            Self::U8(v) => join(v),
            Self::I8(v) => join(v),
            Self::U16(v) => join(v),
            Self::I16(v) => join(v),
            Self::U32(v) => join(v),
            Self::I32(v) => join(v),
            Self::U64(v) => join(v),
            Self::I64(v) => join(v),
            Self::Bool(v) => join(v),
            Self::Float(v) => join(v),
            Self::Double(v) => join(v),
            Self::String(v) => join(v),
        }
    }
}

macro_rules! column_from_vec {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for Column {
                fn from(values: Vec<$ty>) -> Self {
                    Column::$variant(values)
                }
            }
        )*
    };
}

column_from_vec! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    bool => Bool,
    f32 => Float,
    f64 => Double,
    String => String,
}

impl From<Vec<&str>> for Column {
    fn from(values: Vec<&str>) -> Self {
        Column::String(values.into_iter().map(str::to_owned).collect())
    }
}

/// An ordered set of typed columns.
///
/// The store treats tables as opaque values: it never edits one after it has
/// been inserted, and hands them out as `Arc<Table>`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// A single-column table.
    pub fn from_column(column: impl Into<Column>) -> Self {
        Self::new(vec![column.into()])
    }

    /// A single-column, single-row table holding `value`.
    pub fn from_scalar<T>(value: T) -> Self
    where
        Vec<T>: Into<Column>,
    {
        Self::from_column(vec![value])
    }

    /// Append a column; it becomes the last column of the table.
    pub fn add_column(&mut self, column: impl Into<Column>) {
        self.columns.push(column.into());
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, col: usize) -> Option<&Column> {
        self.columns.get(col)
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Row count, taken as the longest column.
    pub fn nrows(&self) -> usize {
        self.columns.iter().map(Column::len).max().unwrap_or(0)
    }

    pub fn schema(&self) -> Vec<ElementType> {
        self.columns.iter().map(Column::element_type).collect()
    }

    pub fn get_i64(&self, col: usize, row: usize) -> Result<i64, TypeError> {
        let column = self.checked(col, row)?;
        column.get_i64(row).ok_or(TypeError::TypeMismatch {
            col,
            requested: "integer",
            actual: column.element_type(),
        })
    }

    pub fn get_f64(&self, col: usize, row: usize) -> Result<f64, TypeError> {
        let column = self.checked(col, row)?;
        column.get_f64(row).ok_or(TypeError::TypeMismatch {
            col,
            requested: "floating point",
            actual: column.element_type(),
        })
    }

    pub fn get_bool(&self, col: usize, row: usize) -> Result<bool, TypeError> {
        let column = self.checked(col, row)?;
        column.get_bool(row).ok_or(TypeError::TypeMismatch {
            col,
            requested: "bool",
            actual: column.element_type(),
        })
    }

    pub fn get_str(&self, col: usize, row: usize) -> Result<&str, TypeError> {
        let column = self.checked(col, row)?;
        column.get_str(row).ok_or(TypeError::TypeMismatch {
            col,
            requested: "string",
            actual: column.element_type(),
        })
    }

    fn checked(&self, col: usize, row: usize) -> Result<&Column, TypeError> {
        let column = self.columns.get(col).ok_or(TypeError::ColumnOutOfRange {
            col,
            ncols: self.columns.len(),
        })?;
        if row >= column.len() {
            return Err(TypeError::RowOutOfRange {
                row,
                nrows: column.len(),
            });
        }
        Ok(column)
    }
}
