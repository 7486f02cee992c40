#![doc = include_str!("../README.md")]

mod conn;
mod error;
mod options;
mod pool;
mod producer;
mod proto;
mod put;
mod request;
#[cfg(test)]
mod testing;

pub use crate::error::*;
pub use crate::options::*;
pub use crate::pool::*;
pub use crate::producer::*;
pub use crate::proto::{DEFAULT_TUBE, MAX_TUBE_NAME_LEN, validate_tube};
pub use crate::put::*;
pub use crate::request::*;
