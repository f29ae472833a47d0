pub mod app;
pub mod command;
pub mod console;
pub mod error;
pub mod indicator;
pub mod jobs;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod presets;
pub mod profile;
pub mod stages;
pub mod validation;

pub use error::PipelineError;
pub use pipeline::{PipelineContext, PipelineExecutor, Stage, StageRegistry};
pub use profile::Profile;
