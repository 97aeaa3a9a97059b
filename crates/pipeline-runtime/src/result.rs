//! Results handed back by the executor.

use futures::stream::{Stream, StreamExt};
use pin_project_lite::pin_project;
use pipeline_core::{
    ChunkStream, GenerateResult, PipelineResult, RequestContext, StreamChunk,
};
use pipeline_plugins::{PluginManager, StreamControl};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A composed output stream together with the invocation it belongs to.
///
/// Polling yields the chunks after every stream transform ran. Dropping the
/// result before the end cancels nothing by itself; call [`abort`](Self::abort)
/// to stop the backend and every nested tool-call recursion.
pub struct StreamTextResult {
    ctx: Arc<RequestContext>,
    plugins: Arc<PluginManager>,
    control: StreamControl,
    stream: ChunkStream,
}

impl StreamTextResult {
    pub(crate) fn new(
        ctx: Arc<RequestContext>,
        plugins: Arc<PluginManager>,
        control: StreamControl,
        stream: ChunkStream,
    ) -> Self {
        Self {
            ctx,
            plugins,
            control,
            stream,
        }
    }

    /// Id of the invocation
    pub fn request_id(&self) -> &str {
        &self.ctx.request_id
    }

    /// Context of the invocation
    pub fn context(&self) -> &Arc<RequestContext> {
        &self.ctx
    }

    pub(crate) fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    /// Abort the request, including nested recursive calls
    pub fn abort(&self) {
        self.control.abort();
    }

    /// Stop reading from the backend; buffered state is still flushed
    pub fn stop(&self) {
        self.control.stop_stream();
    }

    /// The raw chunk stream
    pub fn into_stream(self) -> ChunkStream {
        self.stream
    }

    /// Only the answer text of the stream
    pub fn text_stream(self) -> TextStream {
        TextStream::new(self.stream)
    }

    /// Drain the stream and run `transform_result` hooks on the folded result
    pub async fn collect(self) -> PipelineResult<GenerateResult> {
        let Self {
            ctx,
            plugins,
            stream,
            ..
        } = self;
        let chunks: Vec<PipelineResult<StreamChunk>> = stream.collect().await;
        let result = GenerateResult::from_chunks(chunks)?;
        Ok(plugins.transform_result(result, &ctx).await)
    }

    /// Drain the stream and return the final answer text
    pub async fn text(self) -> PipelineResult<String> {
        self.collect().await.map(|result| result.text)
    }
}

impl Stream for StreamTextResult {
    type Item = PipelineResult<StreamChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().stream.poll_next_unpin(cx)
    }
}

impl fmt::Debug for StreamTextResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTextResult")
            .field("request_id", &self.ctx.request_id)
            .field("depth", &self.ctx.recursion_depth)
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// Text deltas of a chunk stream.
    ///
    /// Other chunk kinds are skipped. The first error ends the stream.
    pub struct TextStream {
        #[pin]
        inner: ChunkStream,
        text: String,
        done: bool,
    }
}

impl TextStream {
    /// Wrap a chunk stream
    pub fn new(inner: ChunkStream) -> Self {
        Self {
            inner,
            text: String::new(),
            done: false,
        }
    }

    /// Text yielded so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the stream ended
    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl Stream for TextStream {
    type Item = PipelineResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(StreamChunk::TextDelta { text }))) => {
                    this.text.push_str(&text);
                    return Poll::Ready(Some(Ok(text)));
                }
                Poll::Ready(Some(Ok(_))) => continue,
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl fmt::Debug for TextStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextStream")
            .field("text", &self.text)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
