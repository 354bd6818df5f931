mod generator;
mod interface;
mod types;

pub use generator::*;
pub use interface::*;
pub use types::*;
