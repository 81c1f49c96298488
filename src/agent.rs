//! Message processing: normalization, orchestration and the worker pool.

pub mod normalizer;
pub mod orchestrator;
pub mod pipeline;
pub mod worker;

pub use normalizer::ReplyChain;
pub use orchestrator::{Orchestrator, Outcome, Request};
pub use pipeline::Pipeline;
pub use worker::{MessageHandler, MessageQueue, QueueReceiver, WorkerPool};
