//! Plain data shared by the `aimg` engine and its callers.

pub mod audit;
pub mod models;
pub mod request;
pub mod settings;
