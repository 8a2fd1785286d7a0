//! Outbound HTTP

mod client;

pub use client::ReqwestHttpClient;
