//! tryon-view library crate.
//!
//! A front-camera preview with a transparent overlay, embedded as host views
//! and driven by per-view method calls (`start`, `stop`, `setEffectBytes`,
//! `clearEffect`, `dispose`).
//!
//! - [`registry::ViewRegistry`] routes calls by view id
//! - [`coordinator`] runs one lifecycle task per view
//! - [`camera`] holds the capture session and platform backends
//! - [`preview`] and [`overlay`] render the preview and the image above it

pub mod camera;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod overlay;
pub mod permissions;
pub mod preview;
pub mod registry;
