//! Request/response model and the network client behind the cache.

mod client;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{is_hop_by_hop, Request, RequestKey, RequestMode, Response};
