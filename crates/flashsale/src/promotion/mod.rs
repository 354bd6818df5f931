mod cache;
mod interface;
mod memory;
mod types;

pub use cache::*;
pub use interface::*;
pub use memory::*;
pub use types::*;
