//! Encrypted API client
//!
//! - **transport**: the HTTP abstraction requests travel over
//! - **client**: the interceptor pipeline applying identity headers,
//!   handshake-on-demand, body encryption and response decryption

pub mod client;
pub mod transport;

pub use client::ApiClient;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
