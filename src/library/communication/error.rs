use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::library::BoxedError;

/// Type erased, cloneable error which retains the error chain information
///
/// Handlers run concurrently on separate tasks and their failures are collected on a shared
/// [`DispatchContext`](super::dispatch::DispatchContext). Since the concrete error types are
/// neither known to the dispatch engine nor cloneable, they are flattened into this structure
/// which keeps the formatted cause chain around for completion handlers to inspect.
///
/// When the Error from which this is created contains another CapturedError in its
/// source chain, it will be consumed and integrated so that one nicely formatted
/// cause chain can be provided at the top-most level.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CapturedError {
    causes: Vec<String>,
}

impl CapturedError {
    /// Creates a new instance from any error type
    ///
    /// Due to std providing default implementations for the `From<T> where T: T` trait,
    /// we can't both implement `Error` and `From<Error>` and have to decide on one.
    pub fn new<E: Error + 'static>(e: E) -> Self {
        (&e as &(dyn Error + 'static)).into()
    }

    /// Creates a new instance from a boxed error type
    pub fn from_boxed(e: BoxedError) -> Self {
        (e.as_ref() as &(dyn Error + 'static)).into()
    }

    /// Creates a new instance from the payload of a panic
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };

        Self {
            causes: vec![format!("handler panicked: {}", message)],
        }
    }

    /// Top-most error message, if any
    pub fn message(&self) -> Option<&str> {
        self.causes.first().map(String::as_str)
    }

    /// All messages of the error chain, outermost first
    pub fn causes(&self) -> &[String] {
        &self.causes
    }
}

#[cfg(test)]
impl CapturedError {
    pub(crate) fn new_with_causes(causes: Vec<String>) -> Self {
        Self { causes }
    }
}

impl Error for CapturedError {}

impl Display for CapturedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(first) = self.causes.first() {
            writeln!(f, "Error: {}", first)?;
        } else {
            writeln!(f, "Unknown error")?;
            return Ok(());
        }

        if self.causes.len() > 1 {
            writeln!(f, "\nCaused by:")?;
            for (index, cause) in self.causes.iter().skip(1).enumerate() {
                writeln!(f, "    {}: {}", index, cause)?;
            }
        }

        Ok(())
    }
}

impl From<&(dyn Error + 'static)> for CapturedError {
    fn from(e: &(dyn Error + 'static)) -> Self {
        let mut source: Option<&(dyn Error + 'static)> = Some(e);
        let mut causes: Vec<String> = Vec::new();

        while let Some(error) = source {
            // Integrate any child CapturedErrors and use ToString for anything else
            if let Some(captured) = error.downcast_ref::<CapturedError>() {
                let mut child_causes = captured.causes.clone();
                causes.append(&mut child_causes);
            } else {
                causes.push(error.to_string());
            }

            source = error.source();
        }

        Self { causes }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use thiserror::Error;

    #[derive(Error, Debug)]
    enum TestError {
        #[error("handler failed")]
        Internal(#[from] CapturedError),
    }

    #[test]
    fn handle_no_cause() {
        let error = CapturedError::new_with_causes(Vec::new());
        assert_eq!(error.to_string(), "Unknown error\n");
    }

    #[test]
    fn consume_nested() {
        let lower_error =
            CapturedError::new_with_causes(vec![String::from("cause1"), String::from("cause2")]);
        let middle_error = TestError::from(lower_error);
        let high_error = CapturedError::from(&middle_error as &(dyn Error + 'static));

        assert_eq!(high_error.causes, vec!["handler failed", "cause1", "cause2"])
    }

    #[test]
    fn format_correctly() {
        let formatted = CapturedError::new_with_causes(vec![
            String::from("cause1"),
            String::from("cause2"),
            String::from("cause3"),
        ])
        .to_string();

        assert_eq!(
            formatted,
            r#"Error: cause1

Caused by:
    0: cause2
    1: cause3
"#
        )
    }

    #[test]
    fn capture_boxed_errors() {
        let boxed: BoxedError = "database on fire".into();
        let error = CapturedError::from_boxed(boxed);

        assert_eq!(error.message(), Some("database on fire"));
    }

    #[test]
    fn capture_panic_messages() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let error = CapturedError::from_panic(payload);

        assert_eq!(error.message(), Some("handler panicked: boom"));
    }
}
