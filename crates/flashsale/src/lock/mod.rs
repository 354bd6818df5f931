mod distributed;
mod holder;

pub use distributed::*;
pub use holder::*;
