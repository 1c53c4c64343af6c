pub mod client;
pub mod socks;

pub use client::{FetchOptions, FetchResponse, ProxyClient};
pub use socks::{tcp_connect, SocksError};
