//! Offline caching daemon for the Mystery Message web app.
//!
//! Sits between the browser and the Mystery Message origin and serves
//! navigations, API calls and static assets from local stores when the
//! network is unavailable.

pub mod cache;
pub mod config;
pub mod net;
pub mod notify;
pub mod server;
pub mod worker;
