pub mod config;
pub mod error;
pub mod model;
pub mod openai;
pub mod pipeline;
pub mod render;
pub mod scene;
pub mod settings;
pub mod storyboard;

pub use error::{PipelineError, PipelineResult};
