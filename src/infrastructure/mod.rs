//! Concrete implementations of the domain collaborator interfaces.

pub mod store;

pub use store::InMemoryMessageStore;
