mod config;
mod disposition;
mod fulfillment;
mod stats;
#[cfg(test)]
mod tests;

pub use config::*;
pub use disposition::*;
pub use fulfillment::*;
pub use stats::*;
