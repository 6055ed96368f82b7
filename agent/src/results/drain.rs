//! Result drain: decouples iteration completion from transmission
//!
//! Producers (engine event handlers, on the loop task) open, fill and close
//! per-iteration [`WorkflowResult`]s; closed results are queued on an
//! unbounded channel. A single worker task transmits them in FIFO order.
//! Previews and upload chunks are produced on the worker, so producers
//! only move values. The engine never waits on the network: if the result
//! service is down, results are logged as lost and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use flow_engine::IterationId;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::preview::apply_preview;
use super::transport::ResultTransport;
use super::wire::to_wire;
use super::{DrainError, PortResult, WorkflowResult};

/// Settings for a drain
#[derive(Debug, Clone)]
pub struct DrainOptions {
    pub agent_id: String,
    pub chunk_bytes: usize,
    /// 0 disables previews
    pub preview_max_pixels: u64,
}

struct InFlight {
    results: HashMap<IterationId, WorkflowResult>,
    /// Most recently started iteration, target of [`ResultDrain::add`]
    current: Option<IterationId>,
}

/// Buffers per-iteration results and ships them in the background
pub struct ResultDrain {
    options: DrainOptions,
    in_flight: Mutex<InFlight>,
    queue: mpsc::UnboundedSender<WorkflowResult>,
    shutdown: CancellationToken,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ResultDrain {
    /// Create the drain and spawn its worker
    pub fn start(options: DrainOptions, transport: Arc<dyn ResultTransport>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(rx, transport, options.clone(), shutdown.clone()));
        log::info!("Result drain started for agent '{}'", options.agent_id);

        Self {
            options,
            in_flight: Mutex::new(InFlight {
                results: HashMap::new(),
                current: None,
            }),
            queue,
            shutdown,
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Open a result for an iteration unless one is already open
    pub fn on_iteration_started(&self, iteration_id: IterationId) {
        let mut in_flight = self.in_flight.lock();
        in_flight
            .results
            .entry(iteration_id)
            .or_insert_with(|| WorkflowResult::new(iteration_id, self.options.agent_id.clone()));
        in_flight.current = Some(iteration_id);
    }

    /// Append to the most recently started iteration
    pub fn add(&self, result: PortResult) -> Result<(), DrainError> {
        let current = self.in_flight.lock().current.ok_or(DrainError::NoOpenIteration)?;
        self.add_for(current, result)
    }

    /// Append to a specific open iteration
    pub fn add_for(&self, iteration_id: IterationId, result: PortResult) -> Result<(), DrainError> {
        let mut in_flight = self.in_flight.lock();
        let open = in_flight
            .results
            .get_mut(&iteration_id)
            .ok_or(DrainError::UnknownIteration(iteration_id))?;
        open.insert(result)
    }

    /// Close an iteration and queue it for transmission
    pub fn on_iteration_finished(&self, iteration_id: IterationId, success: bool) {
        let finished = {
            let mut in_flight = self.in_flight.lock();
            if in_flight.current == Some(iteration_id) {
                in_flight.current = None;
            }
            in_flight.results.remove(&iteration_id)
        };

        let Some(mut result) = finished else {
            log::warn!(
                "Iteration {} finished without an open result; dropping it",
                iteration_id
            );
            return;
        };
        result.finish(success);
        if self.queue.send(result).is_err() {
            log::error!(
                "Result drain is shut down; results of iteration {} are lost",
                iteration_id
            );
        }
    }

    /// Number of iterations still open
    pub fn open_iterations(&self) -> usize {
        self.in_flight.lock().results.len()
    }

    /// Stop the worker; queued results are dropped and counted
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                log::error!("Result drain worker ended abnormally: {}", e);
            }
        }
        let open = self.open_iterations();
        if open > 0 {
            log::warn!("Result drain shut down with {} iterations still open", open);
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<WorkflowResult>,
    transport: Arc<dyn ResultTransport>,
    options: DrainOptions,
    shutdown: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(result) => result,
                None => break,
            },
        };
        let iteration_id = result.iteration_id;
        if let Err(e) = transmit(transport.as_ref(), result, &options).await {
            log::error!(
                "Failed to transmit results of iteration {}: {}. No retry; these results are lost",
                iteration_id,
                e
            );
        }
    }

    rx.close();
    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        log::warn!(
            "Result drain stopped with {} queued iterations; their results are lost",
            dropped
        );
    }
    log::info!("Result drain stopped");
}

/// Preview oversized images, upload every image, then commit the metadata
async fn transmit(
    transport: &dyn ResultTransport,
    mut result: WorkflowResult,
    options: &DrainOptions,
) -> Result<(), super::transport::TransportError> {
    result.map_results(|port| apply_preview(port, options.preview_max_pixels));
    let (record, images) = to_wire(&result);
    for image in images {
        transport
            .add_image(&image.upload, image.chunk_stream(options.chunk_bytes))
            .await?;
    }
    transport.add_result(&record).await
}
