#![doc = include_str!("../README.md")]

mod error;
mod gate;
mod id;
mod lock;
mod order;
mod promotion;
mod queue;
mod store;
#[cfg(test)]
mod testing;
mod time;
mod worker;

pub use crate::error::*;
pub use crate::gate::*;
pub use crate::id::*;
pub use crate::lock::*;
pub use crate::order::*;
pub use crate::promotion::*;
pub use crate::queue::*;
pub use crate::store::*;
pub use crate::time::*;
pub use crate::worker::*;
