//! Core data models for the photo pipeline.
//!
//! `Photo` maps onto the `photos` table via `sqlx::FromRow`; thumbnail
//! width types are request-scoped and never persisted.

pub mod photo;
pub mod size_spec;
