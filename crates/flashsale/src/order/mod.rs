mod error;
mod interface;
mod memory;
mod types;

pub use error::*;
pub use interface::*;
pub use memory::*;
pub use types::*;
