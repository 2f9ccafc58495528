pub mod block;
pub mod config;
pub mod core;
pub mod datablk;
pub mod errors;
pub mod parser;
pub mod sequence;
pub mod structs;
pub mod transport;
pub mod value;
pub mod writer;

pub use crate::block::{BUFRFile, MessageBlock};
pub use crate::config::{CodecConfig, global_config, set_global_config};
pub use crate::core::prelude::*;
pub use crate::datablk::{DataBlock, StoreType};
pub use crate::errors::{Error, Result};
pub use crate::parser::*;
pub use crate::sequence::{expand, zip, zip_once};
pub use crate::structs::bit::BitBuffer;
pub use crate::structs::versions::BUFRMessage;
pub use crate::transport::{
    ByteReader, ByteWriter, MessageStream, memread_message, memwrite_message, read_message,
    read_message_from, write_message, write_message_to,
};
pub use crate::value::Value;
pub use crate::writer::{pack_datablks, read_datablks, write_datablks};
