#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod artifact;
pub mod banner;
pub mod config;
mod engine;
mod error;
pub mod pipeline;
pub mod tool;
mod utils;

pub use crate::artifact::ArtifactWriter;
pub use crate::banner::BannerProvider;
pub use crate::config::PipelineConfig;
#[cfg(feature = "live")]
pub use crate::engine::watch;
pub use crate::engine::{
    Action, CancelToken, Completion, ExecutionPlan, Outcome, RunReport, RunStatus, Scheduler,
    Stage, Task, TaskContext, TaskDef, TaskGraph, TaskRecord,
};
pub use crate::error::*;
pub use crate::pipeline::Pipeline;
pub use crate::tool::{ExternalTool, Isolation, ToolInput, ToolReport};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
#[cfg(feature = "tokio")]
pub use crate::utils::cancel_on_shutdown;
