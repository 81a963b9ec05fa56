//! Pipeline synthesis: per-image stage plans and the aggregate document.

pub mod assembler;
pub mod config;
pub mod writer;

pub use assembler::PipelineAssembler;
pub use config::{escape_target, PipelineConfig, DESCRIPTOR_EXTENSION};
pub use writer::{RenderOptions, StageTemplate};
