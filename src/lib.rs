//! bevy_markdown_chat: a single-page streaming markdown chat, as a bevy plugin.
//!
//! - `ChatState` is the single source of truth: prompt text, streamed output
//!   buffer, busy flag. uis read `rendered()` for the math-normalized view.
//! - `SubmitPrompt` opens one streaming chat completion via the `llm` crate
//!   and appends every non-empty text delta to the buffer in arrival order,
//!   one observable update per delta.
//! - never blocks the main thread: on native the stream is driven by a tiny
//!   tokio runtime (no bevy pool blocking); on wasm it runs on bevy's async
//!   pool, which yields to the browser event loop.
//!
//! api docs for the provider types: https://docs.rs/llm
//!   - chat provider:         `llm::chat::ChatProvider`
//!   - message builder/roles: `llm::chat::{ChatMessage, ChatRole}`
//!   - streaming:             `llm::chat::{StreamResponse, StreamChoice, StreamDelta}`

pub mod normalize;
pub mod state;

use bevy::prelude::*;
use bevy::tasks::futures_lite::StreamExt;
use bevy::tasks::AsyncComputeTaskPool;
use flume::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use thiserror::Error;

pub use crate::normalize::normalize_math_delimiters;
pub use crate::state::{ChatState, STREAM_FAILURE_NOTICE};

/// re-export the llm types so downstream code can use the same structs/enums.
pub use llm::{
    builder::{LLMBackend, LLMBuilder},
    chat::{ChatMessage, ChatProvider, ChatRole, StreamChoice, StreamDelta, StreamResponse},
    error::LLMError,
    LLMProvider,
};

/// connection settings for the hosted completion service. the credential is
/// an explicit value handed to `StreamProvider::from_config`, never ambient
/// process state, so tests and tools can swap it freely.
#[derive(Resource, Clone, Debug, Default)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider build failed: {0}")]
    Build(#[from] LLMError),
}

/// the configured provider used to open completion streams.
#[derive(Resource, Clone)]
pub struct StreamProvider(pub Arc<dyn LLMProvider>);

impl StreamProvider {
    /// build an openai-compatible provider from explicit config. empty
    /// `base_url` falls through to the backend default; empty `api_key` is
    /// allowed for local servers.
    pub fn from_config(config: &ChatConfig) -> Result<Self, ProviderError> {
        info!(
            target: "bevy_markdown_chat",
            "from_config: base_url='{}', model='{}', key_present={}",
            config.base_url, config.model, !config.api_key.is_empty()
        );
        let mut b = LLMBuilder::new()
            .backend(LLMBackend::OpenAI)
            .model(config.model.clone());
        if !config.base_url.is_empty() {
            b = b.base_url(config.base_url.clone());
        }
        if !config.api_key.is_empty() {
            b = b.api_key(config.api_key.clone());
        }
        Ok(Self(b.build()?.into()))
    }
}

/// on native we keep a tiny tokio runtime to drive `llm` futures.
/// we spawn onto this rt from compute tasks so neither the main thread
/// nor bevy's compute pools block.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Resource, Clone)]
pub struct TokioRt(pub Arc<tokio::runtime::Runtime>);

#[cfg(not(target_arch = "wasm32"))]
impl Default for TokioRt {
    fn default() -> Self {
        info!(target: "bevy_markdown_chat", "initializing tokio multi-thread runtime (native)");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("tokio runtime");
        Self(Arc::new(rt))
    }
}

/// system ordering so uis can run after state has been updated
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum ChatSet {
    /// inbox messages are applied to `ChatState` here (in `Update`)
    Drain,
}

/// request one submission of the current prompt. silently rejected while a
/// stream is in flight or when the trimmed prompt is empty.
#[derive(Event, Debug, Default)]
pub struct SubmitPrompt;

/// the stream ended normally; `text` is the full accumulated response.
#[derive(Event, Debug)]
pub struct ResponseCompleted {
    pub text: String,
}

/// the stream failed; the buffer now holds `STREAM_FAILURE_NOTICE`.
#[derive(Event, Debug)]
pub struct ResponseFailed {
    pub error: String,
}

/// cross-thread inbox for streaming; the task sends, the main thread drains.
/// bounded to avoid unbounded growth when the frame stalls briefly.
#[derive(Resource, Clone)]
struct StreamInbox {
    tx: Sender<StreamMsg>,
    rx: Receiver<StreamMsg>,
}

impl Default for StreamInbox {
    fn default() -> Self {
        let (tx, rx) = flume::bounded(2048);
        Self { tx, rx }
    }
}

#[derive(Debug)]
enum StreamMsg {
    Delta(String),
    Done,
    Failed(String),
}

/// send to inbox (ignore full/disconnected)
fn push_inbox(tx: &Sender<StreamMsg>, msg: StreamMsg) {
    let _ = tx.send(msg);
}

/// bevy plugin: wires state, events, and the submit/drain systems.
/// requires a `StreamProvider` resource before the first submission.
/// on native, also inserts a tiny tokio runtime resource by default.
pub struct MarkdownChatPlugin;

impl Plugin for MarkdownChatPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "bevy_markdown_chat", "MarkdownChatPlugin: build()");
        app.init_resource::<StreamInbox>()
            .init_resource::<ChatState>()
            .add_event::<SubmitPrompt>()
            .add_event::<ResponseCompleted>()
            .add_event::<ResponseFailed>()
            .configure_sets(Update, ChatSet::Drain)
            .add_systems(Update, drain_stream_inbox.in_set(ChatSet::Drain))
            // submissions start in Update; the stream runs off-thread/tokio
            .add_systems(Update, begin_stream_requests);

        #[cfg(not(target_arch = "wasm32"))]
        if app.world().get_resource::<TokioRt>().is_none() {
            app.insert_resource(TokioRt::default());
        }
    }
}

/// consumes submit events. an accepted submission resets the buffer, raises
/// the busy flag (both observable this frame), and spawns the streaming
/// task. rejected submissions change nothing at all.
fn begin_stream_requests(
    mut ev_submit: EventReader<SubmitPrompt>,
    mut state: ResMut<ChatState>,
    provider: Res<StreamProvider>,
    inbox: Res<StreamInbox>,

    // native-only: small runtime to drive network futures from `llm`
    #[cfg(not(target_arch = "wasm32"))] rt: Res<TokioRt>,
) {
    for _ in ev_submit.read() {
        // guard on shared refs; a rejected submit must not trip change detection
        if state.is_busy() || state.prompt().trim().is_empty() {
            info!(
                target: "bevy_markdown_chat",
                "submit rejected (busy={}, prompt_len={})",
                state.is_busy(), state.prompt().trim().len()
            );
            continue;
        }
        if !state.begin_submission() {
            continue;
        }

        let prompt = state.prompt().to_string();
        let provider = provider.0.clone();
        let inbox_tx = inbox.tx.clone();
        info!(target: "bevy_markdown_chat", "submit accepted (prompt_len={})", prompt.len());

        let pool = AsyncComputeTaskPool::get();
        #[cfg(not(target_arch = "wasm32"))]
        let rt = rt.0.clone();

        // spawn an async compute task; internally we hand off to tokio (native).
        pool.spawn(async move {
            let run = stream_completion(provider, prompt, inbox_tx);

            #[cfg(target_arch = "wasm32")]
            {
                // wasm path: just await directly (no tokio).
                run.await;
            }
            #[cfg(not(target_arch = "wasm32"))]
            {
                // native: hand off to tokio so bevy pools stay free.
                let _ = rt.spawn(run).await;
            }
        })
        .detach();
    }
}

/// opens one streaming completion for a single user-role message and
/// forwards every non-empty text delta, in arrival order and without
/// coalescing, to the inbox. any failure ends the submission with `Failed`;
/// no retry, no fallback, no timeout of our own.
async fn stream_completion(provider: Arc<dyn LLMProvider>, prompt: String, tx: Sender<StreamMsg>) {
    let messages = vec![ChatMessage::user().content(prompt).build()];
    let mut stream = match provider.chat_stream_struct(&messages).await {
        Ok(s) => s,
        Err(err) => {
            error!(target: "bevy_markdown_chat", "stream open failed: {}", err);
            push_inbox(&tx, StreamMsg::Failed(err.to_string()));
            return;
        }
    };

    let mut total = 0usize;
    while let Some(item) = stream.next().await {
        match item {
            Ok(StreamResponse { choices, .. }) => {
                for StreamChoice {
                    delta: StreamDelta { content, .. },
                } in choices
                {
                    // zero-length deltas carry nothing renderable; skip without notifying
                    if let Some(txt) = content
                        && !txt.is_empty()
                    {
                        total += txt.len();
                        push_inbox(&tx, StreamMsg::Delta(txt));
                    }
                }
            }
            Err(err) => {
                error!(target: "bevy_markdown_chat", "streaming error: {}", err);
                push_inbox(&tx, StreamMsg::Failed(err.to_string()));
                return;
            }
        }
    }
    info!(target: "bevy_markdown_chat", "stream completed: total_len={}", total);
    push_inbox(&tx, StreamMsg::Done);
}

/// applies inbox messages to `ChatState` in arrival order. each delta is one
/// observable buffer update; `Done`/`Failed` clear the busy flag and emit
/// the matching event. failures are fully recovered here and never
/// propagate further.
fn drain_stream_inbox(
    inbox: Res<StreamInbox>,
    mut state: ResMut<ChatState>,
    mut ev_done: EventWriter<ResponseCompleted>,
    mut ev_err: EventWriter<ResponseFailed>,
) {
    // cap per frame to avoid long frames on bursty streams; the channel is
    // fifo, so ordering holds across frames
    const MAX_PER_FRAME: usize = 512;
    for _ in 0..MAX_PER_FRAME {
        let msg = match inbox.rx.try_recv() {
            Ok(m) => m,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        };
        match msg {
            StreamMsg::Delta(text) => state.apply_delta(&text),
            StreamMsg::Done => {
                state.finish();
                ev_done.write(ResponseCompleted {
                    text: state.output().to_string(),
                });
            }
            StreamMsg::Failed(error) => {
                warn!(target: "bevy_markdown_chat", "submission failed: {}", error);
                state.fail();
                ev_err.write(ResponseFailed { error });
            }
        }
    }
}
