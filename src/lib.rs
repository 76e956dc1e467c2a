//! This library crate contains a reliable, at-least-once queue abstraction and a fan-out dispatch engine on top of it.
//!
//! Submodules have been introduced to split responsibilities. The low-level [`library`] contains the queue
//! contract, its provider implementations and the consumer-side dispatch engine while the [`harness`] provides
//! the process lifecycle glue used by the executable to run consumers as long-lived services.

#![deny(missing_docs)]

pub mod harness;
pub mod library;
