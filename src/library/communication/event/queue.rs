use std::fmt;

const PROCESSING_SUFFIX: &str = "processing";
const HASH_SUFFIX: &str = "hash";
const WAKE_SUFFIX: &str = "wake";

/// Describes a named queue and the auxiliary structures derived from its name
///
/// A queue has two physical representations in the backing store: the *ready* list holding
/// messages awaiting a consumer and the *processing* list holding messages that have been
/// claimed but not yet acknowledged. Additionally, there is a table of content hashes used
/// for deduplication and a channel to wake up idle consumers. All of these are named
/// deterministically from the queue name so that every process sharing a queue agrees on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueDescriptor {
    key: String,
}

impl QueueDescriptor {
    /// Creates a new instance from a queue name
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Name of the queue, also used as the key of the ready list
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Retrieves the key (ref [`key()`](QueueDescriptor::key) method) with an extension added
    pub fn key_with_extension(&self, extension: &str) -> String {
        format!("{}.{}", self.key, extension)
    }

    /// Key of the list holding claimed but unacknowledged entries
    pub fn processing_key(&self) -> String {
        self.key_with_extension(PROCESSING_SUFFIX)
    }

    /// Key of the table mapping content hashes to presence markers
    pub fn hash_key(&self) -> String {
        self.key_with_extension(HASH_SUFFIX)
    }

    /// Channel on which enqueues are announced to idle consumers
    pub fn wake_channel(&self) -> String {
        self.key_with_extension(WAKE_SUFFIX)
    }

    /// Whether the name is usable, i.e. non-empty and not only whitespace
    pub fn is_valid(&self) -> bool {
        !self.key.trim().is_empty()
    }
}

impl fmt::Display for QueueDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<&str> for QueueDescriptor {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for QueueDescriptor {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}
