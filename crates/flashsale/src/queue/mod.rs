mod claim;
mod claim_queue;
mod config;

pub use claim::*;
pub use claim_queue::*;
pub use config::*;
