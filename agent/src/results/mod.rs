//! Result capture and transmission
//!
//! Port values captured during an iteration are collected into a
//! [`WorkflowResult`], then shipped by the [`ResultDrain`] worker through a
//! [`ResultTransport`].

mod drain;
mod preview;
mod transport;
mod types;
mod wire;

use flow_engine::IterationId;
use thiserror::Error;

pub use drain::{DrainOptions, ResultDrain};
pub use transport::{
    ChunkStream, HttpResultTransport, LogResultTransport, ResultTransport, TransportError,
};
pub use types::{PortResult, WorkflowResult};
pub use wire::{ImageUpload, WireResult};

/// Errors recording results
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("Result id '{result_id}' already recorded for iteration {iteration_id}")]
    DuplicateResultId {
        iteration_id: IterationId,
        result_id: String,
    },

    #[error("No open result for iteration {0}")]
    UnknownIteration(IterationId),

    #[error("No iteration is open")]
    NoOpenIteration,
}
