//! Docker container launching.

mod engine;
mod launcher;

pub use engine::{ContainerEngine, DockerEngine};
pub use launcher::{ContainerHandle, LaunchOptions, LaunchRequest, Launcher};
