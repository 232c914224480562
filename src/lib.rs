//! Round-robin reverse-proxy load balancer.
//!
//! Requests are dispatched to a pool of upstream backends. Each backend runs
//! its own heartbeat against `/health`; only healthy backends are selected,
//! and removing a backend drains its in-flight requests first.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod mock;
pub mod observability;

pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::{Backend, BackendPool, PoolError};
