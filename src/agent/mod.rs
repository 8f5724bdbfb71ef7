pub mod coder;
pub mod engine;
pub mod model;
pub mod prompt;
pub mod tools;

pub use coder::{CodingAgent, CodingTask, PatchAuthor, RevisionFeedback};
pub use engine::{AgentEngine, AgentOutcome};
pub use model::{ModelBackend, ModelClient};
