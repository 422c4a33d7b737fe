//! # ioprov-core — trait and data-type definitions for the I/O provider engine
//!
//! This crate is the contract every other crate in the workspace builds
//! against. It defines the `AsyncIoProvider` trait, the entry/completion
//! types that flow across it, and the shared error type. It performs no
//! I/O and makes no OS calls itself — concrete behaviour lives in
//! `ioprov-buffers` (the pools) and `ioprov-backends` (the provider
//! variants).
//!
//! Every component downstream depends on these types, never on a
//! concrete provider. Swapping `RioProvider` for `ReadinessProvider` is a
//! type-parameter change, not a rewrite.

pub mod buffer;
pub mod entry;
pub mod error;
pub mod provider;

pub use entry::{
    CompletionEntry, OpId, OpIdGenerator, OperationKind, PendingOperation, ProviderCapabilities,
    ProviderInfo, ProviderStats, RegisteredBufferId, RequestContext,
};
pub use error::{ProviderError, Result};
pub use provider::{AsyncIoProvider, SocketHandle};
