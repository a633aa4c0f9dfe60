//! NetEase Cloud Music collaborators: catalog search, track resolution,
//! authentication, and the download side effect.

pub mod api;
pub mod auth;
pub mod download;
pub mod models;
