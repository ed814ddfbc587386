//! HTTP transport.

mod client;
pub use client::HttpPoster;
