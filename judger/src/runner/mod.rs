//! Concrete implementation of running code in containers.
//!
//! This module is not responsible for interpreting what the code printed. See
//! [`crate::judge`] for corresponding code.

pub mod docker;
pub mod exec;
pub mod image;
pub mod model;
pub mod runtime;
mod util;

pub use docker::DockerRuntime;
pub use exec::Sandbox;
pub use image::ImageProvisioner;
pub use runtime::ContainerRuntime;
