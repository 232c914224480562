//! Disposable upstream servers for demos and tests.
//!
//! A [`MockUpstream`] answers `GET /health` with a settable status and
//! every other request with its name, after an optional delay.

pub mod upstream;

pub use upstream::MockUpstream;
