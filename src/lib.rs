//! Photo asset pipeline: streamed uploads into object storage, and originals
//! or thumbnails served back through a local disk cache with graceful
//! degradation to redirects when storage is unreachable.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

#[cfg(test)]
pub mod test_utils;
