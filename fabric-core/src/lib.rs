//! Strong-typed Rust bindings over a libfabric-shaped RDMA/HPC networking
//! model: fabric/domain/info objects, address vectors, memory registration,
//! completion/event queues, a submission-context dispatch layer bridging
//! raw completions to callback/coroutine/promise/executor receivers, an
//! endpoint verb surface, and a reactor that drives progress.
//!
//! This crate does not link libfabric itself — the real provider ABI is
//! out of scope here (see [`backend`]'s module doc) — so every test runs
//! against the in-process [`testing::MockBackend`]. A production binding
//! would implement [`backend::FabricBackend`] over `fi_*` calls and plug
//! it in wherever this crate's examples construct a `MockBackend`.
//!
//! Reaching for a provider tag directly? Start with [`provider::Verbs`],
//! [`provider::Efa`], [`provider::Cxi`], [`provider::Shm`], or
//! [`provider::Tcp`] — each is a zero-sized type selecting its code path at
//! compile time through [`provider::ProviderTraits`].

pub mod address;
pub mod av;
pub mod backend;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod fabric;
pub mod memory;
pub mod primitives;
pub mod provider;
pub mod queue;
pub mod reactor;
pub mod staged;
pub mod testing;
pub mod triggered;

pub mod prelude;

pub use error::{Error, ErrorKind, Result, VoidResult};
