use super::QueueDescriptor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::type_name;

/// Payload which can be sent through a queue
///
/// Each implementation is bound to exactly one queue. Types which share a queue with other
/// programs or languages should override [`queue()`](Message::queue) with an explicit name.
/// Otherwise, the fully qualified type path is used, which is stable for a given build.
///
/// The field names `$enqueuedAt` and `$value` are reserved for the stored record. Messages
/// serializing into an object with the former, or with nothing but the latter, are rejected
/// when sent.
///
/// ```
/// use quay::library::communication::event::{Message, QueueDescriptor};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Invoice {
///     number: u64,
/// }
///
/// impl Message for Invoice {
///     fn queue() -> QueueDescriptor {
///         QueueDescriptor::new("invoices")
///     }
/// }
///
/// assert_eq!(Invoice::queue().key(), "invoices");
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Queue on which this implementation can be sent and received
    fn queue() -> QueueDescriptor {
        QueueDescriptor::new(type_name::<Self>())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct NamedMessage {
        text: String,
    }

    impl Message for NamedMessage {
        fn queue() -> QueueDescriptor {
            QueueDescriptor::new("TestQueue")
        }
    }

    #[derive(Serialize, Deserialize)]
    struct AnonymousMessage;

    impl Message for AnonymousMessage {}

    #[test]
    fn use_explicit_queue_name() {
        assert_eq!(NamedMessage::queue().key(), "TestQueue");
    }

    #[test]
    fn derive_stable_name_from_type() {
        let first = AnonymousMessage::queue();
        let second = AnonymousMessage::queue();

        assert_eq!(first, second);
        assert!(first.key().ends_with("AnonymousMessage"));
        assert!(first.key().starts_with("quay::"));
    }
}
