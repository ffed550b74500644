//! Foundation types for eau2.
//!
//! Every other eau2 crate depends on `eau2-types`. The store itself only
//! needs three things from the data layer: a way to name objects, a way to
//! say which node owns them, and an opaque table it can hand around.
//!
//! # Key Types
//!
//! - [`NodeId`]: small integer identity of a node; `0` is the registrar
//! - [`Key`]: `(name, home)` pair naming one stored table
//! - [`Table`]: ordered list of typed [`Column`]s, shared as `Arc<Table>`
//! - [`ElementType`]: the scalar type carried by a column

pub mod error;
pub mod key;
pub mod table;

pub use error::TypeError;
pub use key::{Key, NodeId, REGISTRAR_ID};
pub use table::{Column, ElementType, Table};
