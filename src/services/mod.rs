pub mod local_cache;
pub mod object_store;
pub mod photo_repository;
pub mod photo_service;
pub mod retrieval;
pub mod transcoder;
pub mod upload;
