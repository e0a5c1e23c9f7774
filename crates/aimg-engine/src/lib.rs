//! Request validation and dispatch for remote image generation.
//!
//! A [`Dispatcher`] takes one [`RequestDescriptor`], checks it, makes a single
//! blocking call to the image API and fans the returned URLs out to the
//! browser and/or numbered PNG files.

pub mod api;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod output;
pub mod sinks;
pub mod validator;

pub use aimg_contracts::request::{GeneratedImageRef, RequestDescriptor};
pub use api::{ImageApi, OpenAiImageApi};
pub use credentials::{ApiKey, CredentialSource, EnvCredentials};
pub use dispatcher::{DispatchReport, Dispatcher, ModelChoice};
pub use error::{DispatchError, ValidationError};
pub use output::output_path;
pub use sinks::{BrowserOpener, HttpFetcher, ImageFetcher, SystemBrowser};
pub use validator::{measure, validate, ImageMetrics, MAX_INPUT_BYTES};
