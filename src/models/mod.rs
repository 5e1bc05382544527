//! Core data models for the file-drop service.
//!
//! These types describe in-flight chunked uploads (persisted as JSON in each
//! upload's working directory) and files already published to the public
//! upload directory.

pub mod published;
pub mod upload;
