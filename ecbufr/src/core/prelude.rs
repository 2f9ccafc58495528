pub use super::FXY;
pub use super::tables::{
    BTableEntry, DTableEntry, DataType, TableLookup, TableSet, Tables, ValueEncoding,
};
