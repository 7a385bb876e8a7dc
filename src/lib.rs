//! Capture facial-expression samples from a webcam, train a classifier on
//! face-mesh landmarks and run it live on the same stream.

pub mod args;
pub mod camera;
pub mod capture;
pub mod commands;
pub mod config;
pub mod dataset;
pub mod detector;
pub mod error;
pub mod font;
pub mod inference;
pub mod landmarks;
pub mod logging;
pub mod mesh;
pub mod mode;
pub mod model;
pub mod output;
pub mod overlay;
pub mod pipeline;
pub mod store;
pub mod studio;
pub mod trainer;
pub mod ttf;
pub mod types;

pub use error::{Error, Result};
