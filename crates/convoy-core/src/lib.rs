pub mod config;
pub mod image;
pub mod spec;

pub use config::{ConvoyConfig, ServiceConfig, parse_duration};
pub use image::ImageRef;
pub use spec::*;
