mod admission;
mod keys;
#[cfg(test)]
mod tests;

pub use admission::*;
pub use keys::*;
