//! Remote store client: typed create/query/patch/count/rpc over a
//! pluggable backend.

pub mod client;
pub mod filter;
pub mod memory;
pub mod rest;
pub mod traits;

pub use client::StoreClient;
pub use filter::{Condition, Filter, Op, Order, Query};
pub use memory::MemoryStore;
pub use rest::RestStore;
pub use traits::{Backend, Record, collections, procedures};
