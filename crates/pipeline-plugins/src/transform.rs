//! Stream transform chain.
//!
//! Every plugin's `transform_stream` factory yields one [`StreamTransform`]
//! unit per stream. [`StreamTransformChain::apply`] wires the units into a
//! pipeline: the source and each unit run as their own task, connected by
//! bounded channels. Chunk N passes unit 1 before unit 2 sees it, and a unit
//! that sleeps only backpressures its own consumer.
//!
//! ```text
//! source ──► [pump] ──ch──► [unit 1] ──ch──► [unit 2] ──ch──► caller
//! ```
//!
//! End and error signals travel the same channels, after each unit flushed.

use crate::plugin::TransformFactory;
use async_trait::async_trait;
use futures::StreamExt;
use pipeline_core::{
    AbortSignal, ChunkStream, PipelineError, PipelineResult, RequestContext, StreamChunk,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Default per-stage channel capacity
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// One stage of a composed stream
#[async_trait]
pub trait StreamTransform: Send {
    /// Handle one upstream chunk, emitting zero or more chunks
    async fn transform(
        &mut self,
        chunk: StreamChunk,
        out: &mut TransformController,
    ) -> PipelineResult<()>;

    /// Emit buffered state once upstream has ended
    async fn flush(&mut self, _out: &mut TransformController) -> PipelineResult<()> {
        Ok(())
    }

    /// Called when upstream failed, before the error is forwarded.
    ///
    /// Defaults to [`flush`](Self::flush).
    async fn flush_on_error(
        &mut self,
        _error: &PipelineError,
        out: &mut TransformController,
    ) -> PipelineResult<()> {
        self.flush(out).await
    }
}

/// Control object shared by every unit of one stream
#[derive(Clone, Debug)]
pub struct StreamControl {
    stop: Arc<watch::Sender<bool>>,
    abort: AbortSignal,
}

impl StreamControl {
    /// Create a control bound to an abort signal
    #[must_use]
    pub fn new(abort: AbortSignal) -> Self {
        let (stop, _rx) = watch::channel(false);
        Self {
            stop: Arc::new(stop),
            abort,
        }
    }

    /// Stop pulling from the source. Units drain and flush, then the stream
    /// ends normally.
    pub fn stop_stream(&self) {
        self.stop.send_replace(true);
    }

    /// Whether `stop_stream` was called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// The abort signal of the request
    #[must_use]
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    /// Abort the whole request
    pub fn abort(&self) {
        self.abort.abort();
    }
}

/// Downstream handle given to a unit while it runs
#[derive(Debug)]
pub struct TransformController {
    tx: mpsc::Sender<PipelineResult<StreamChunk>>,
    control: StreamControl,
    emitted: u64,
}

impl TransformController {
    fn new(tx: mpsc::Sender<PipelineResult<StreamChunk>>, control: StreamControl) -> Self {
        Self {
            tx,
            control,
            emitted: 0,
        }
    }

    /// Emit a chunk downstream, waiting for channel capacity
    pub async fn enqueue(&mut self, chunk: StreamChunk) -> PipelineResult<()> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| PipelineError::stream_transform("downstream receiver dropped"))?;
        self.emitted += 1;
        Ok(())
    }

    /// The shared stream control
    #[must_use]
    pub fn control(&self) -> &StreamControl {
        &self.control
    }

    /// Chunks emitted so far by this unit
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Whether the downstream consumer went away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn fail(&self, error: PipelineError) {
        let _ = self.tx.send(Err(error)).await;
    }
}

/// A transform factory together with the plugin that provided it
#[derive(Clone)]
pub struct NamedTransform {
    /// Providing plugin
    pub plugin: String,
    /// Factory
    pub factory: TransformFactory,
}

impl std::fmt::Debug for NamedTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedTransform")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

/// Ordered list of transform factories applied to one stream at a time
#[derive(Debug, Clone)]
pub struct StreamTransformChain {
    transforms: Vec<NamedTransform>,
    capacity: usize,
}

impl StreamTransformChain {
    /// Create a chain from factories in application order
    #[must_use]
    pub fn new(transforms: Vec<NamedTransform>) -> Self {
        Self {
            transforms,
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the per-stage channel capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Number of units
    #[must_use]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Whether the chain has no units
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Compose the chain over `source`.
    ///
    /// Each factory is invoked exactly once. Must be called inside a tokio
    /// runtime.
    pub fn apply(
        &self,
        source: ChunkStream,
        control: &StreamControl,
        ctx: &Arc<RequestContext>,
    ) -> ChunkStream {
        let mut rx = spawn_source(source, control.clone(), self.capacity);
        for named in &self.transforms {
            let unit = (named.factory)(control, Arc::clone(ctx));
            rx = spawn_stage(
                named.plugin.clone(),
                unit,
                rx,
                control.clone(),
                self.capacity,
            );
        }
        debug!(
            request_id = %ctx.request_id,
            stages = self.transforms.len(),
            "Stream transform chain composed"
        );
        receiver_stream(rx)
    }
}

/// Compose `transforms` over `source` with the default channel capacity
pub fn compose(
    source: ChunkStream,
    transforms: Vec<NamedTransform>,
    control: &StreamControl,
    ctx: &Arc<RequestContext>,
) -> ChunkStream {
    StreamTransformChain::new(transforms).apply(source, control, ctx)
}

fn receiver_stream(mut rx: mpsc::Receiver<PipelineResult<StreamChunk>>) -> ChunkStream {
    async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    }
    .boxed()
}

enum SourceEvent {
    Item(PipelineResult<StreamChunk>),
    End,
    Aborted,
    Closed,
}

fn spawn_source(
    mut source: ChunkStream,
    control: StreamControl,
    capacity: usize,
) -> mpsc::Receiver<PipelineResult<StreamChunk>> {
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(async move {
        let abort = control.abort_signal().clone();
        loop {
            let event = tokio::select! {
                biased;
                () = abort.aborted() => SourceEvent::Aborted,
                () = control.stopped() => SourceEvent::End,
                () = tx.closed() => SourceEvent::Closed,
                item = source.next() => item.map_or(SourceEvent::End, SourceEvent::Item),
            };
            match event {
                SourceEvent::Item(Ok(chunk)) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                SourceEvent::Item(Err(error)) => {
                    let _ = tx.send(Err(error)).await;
                    return;
                }
                SourceEvent::Aborted => {
                    let _ = tx.send(Err(PipelineError::Aborted)).await;
                    return;
                }
                SourceEvent::End | SourceEvent::Closed => return,
            }
        }
    });
    rx
}

enum StageEvent {
    Item(PipelineResult<StreamChunk>),
    End,
    Aborted,
    Closed,
}

fn spawn_stage(
    plugin: String,
    mut unit: Box<dyn StreamTransform>,
    mut upstream: mpsc::Receiver<PipelineResult<StreamChunk>>,
    control: StreamControl,
    capacity: usize,
) -> mpsc::Receiver<PipelineResult<StreamChunk>> {
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(async move {
        let abort = control.abort_signal().clone();
        let mut out = TransformController::new(tx, control);

        loop {
            let event = tokio::select! {
                biased;
                () = abort.aborted() => StageEvent::Aborted,
                () = out.tx.closed() => StageEvent::Closed,
                item = upstream.recv() => item.map_or(StageEvent::End, StageEvent::Item),
            };

            match event {
                StageEvent::Item(Ok(chunk)) => {
                    let result = tokio::select! {
                        biased;
                        () = abort.aborted() => Err(PipelineError::Aborted),
                        result = unit.transform(chunk, &mut out) => result,
                    };
                    if let Err(error) = result {
                        report_failure(&plugin, &out, error).await;
                        return;
                    }
                }
                StageEvent::Item(Err(PipelineError::Aborted)) | StageEvent::Aborted => {
                    out.fail(PipelineError::Aborted).await;
                    return;
                }
                StageEvent::Item(Err(error)) => {
                    if let Err(flush_error) = unit.flush_on_error(&error, &mut out).await {
                        warn!(
                            plugin = %plugin,
                            error = %flush_error,
                            "Flush after upstream error failed"
                        );
                    }
                    out.fail(error).await;
                    return;
                }
                StageEvent::Closed => return,
                StageEvent::End => break,
            }
        }

        let result = tokio::select! {
            biased;
            () = abort.aborted() => Err(PipelineError::Aborted),
            result = unit.flush(&mut out) => result,
        };
        if let Err(error) = result {
            report_failure(&plugin, &out, error).await;
        }
    });
    rx
}

async fn report_failure(plugin: &str, out: &TransformController, error: PipelineError) {
    if out.is_closed() {
        debug!(plugin = %plugin, "Downstream closed, stopping stage");
        return;
    }
    if error != PipelineError::Aborted {
        warn!(plugin = %plugin, error = %error, "Stream transform failed");
    }
    out.fail(error).await;
}
