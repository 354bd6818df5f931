/// Names of the claim stream and its consumer group.
///
/// Group and consumer identity are deployment configuration; nothing in the
/// wire entry refers to them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    pub stream: String,
    pub group: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream: "stream.orders".to_owned(),
            group: "g1".to_owned(),
        }
    }
}

impl QueueConfig {
    /// Stream receiving entries that need manual reconciliation.
    pub fn dead_letter_stream(&self) -> String {
        format!("{}.dlq", self.stream)
    }
}
