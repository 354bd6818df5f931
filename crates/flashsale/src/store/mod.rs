mod error;
mod interface;
mod journal;
mod memory;
mod stream;

pub use error::*;
pub use interface::*;
pub use memory::*;
pub use stream::*;
