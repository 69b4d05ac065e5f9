//! Core crate for cipta: the RGBA/tensor codec and the local 4x
//! super-resolution pipeline built around it.

pub mod backend;
pub mod codec;
pub mod compare;
pub mod config;
pub mod imageio;
pub mod logging;
pub mod pipeline;
pub mod runtime;
pub mod upscaler;
