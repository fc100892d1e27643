//! pixelswarm: agent swarms that live entirely on the GPU and paint straight
//! into a pixel buffer. Two kernel programs ship built in: agents steering
//! toward the pointer, and diffusion-limited aggregation around a seed.

pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod gpu;
pub mod headless;
pub mod input;
pub mod orchestrator;
pub mod pipeline;
pub mod present;
pub mod renderer;
pub mod world;
