use core::fmt;
use std::sync::OnceLock;

/// Random prefix shared by every holder token minted in this process.
fn process_prefix() -> &'static str {
    static PREFIX: OnceLock<String> = OnceLock::new();
    PREFIX.get_or_init(|| format!("{:032x}", rand::random::<u128>()))
}

/// Identity written into a lock so that only its holder can release it.
///
/// Tokens are `{process prefix}-{local name}`, unique across processes even
/// when two processes use the same consumer name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HolderToken(String);

impl HolderToken {
    /// Mints the token of `local` (typically the consumer name) in this
    /// process. Repeated calls with the same name return equal tokens.
    pub fn for_local(local: &str) -> Self {
        Self(format!("{}-{local}", process_prefix()))
    }

    /// Wraps an externally chosen token.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
