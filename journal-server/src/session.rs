//! One live journaling session
//!
//! A session owns its resolved user id, a cancellation token (child of the
//! server's shutdown token), and a worker task that runs assistant turns one
//! at a time in submission order. User fragments are appended and echoed
//! immediately; the completion for each is queued behind earlier turns.

use std::sync::Arc;

use journal_core::{CompletionBackend, Message, ServerEvent, SystemNotice};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::http::HttpState;
use crate::middleware::RequestIdentity;
use crate::subsystems::history::HistoryStore;
use crate::subsystems::prompts::random_prompt;
use crate::subsystems::relay::{deliver, run_turn, PendingTurn, TurnContext, TurnOutcome};

/// Pending turns a session may queue before the reader waits.
pub const TURN_QUEUE_DEPTH: usize = 32;

pub struct Session {
    user_id: String,
    history: HistoryStore,
    outbound: mpsc::Sender<ServerEvent>,
    turns: mpsc::Sender<PendingTurn>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

/// Identifier for a connection without a verified identity.
pub fn anonymous_user_id() -> String {
    format!("anon-{}", Uuid::new_v4())
}

impl Session {
    /// Bind an identity, greet the client, and start the turn worker.
    ///
    /// Emits the `system` notice, then one opening prompt as an assistant
    /// message (appended to history before it is sent).
    pub async fn open(
        state: &HttpState,
        identity: &RequestIdentity,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Self {
        let user_id = identity
            .user_id()
            .map(str::to_string)
            .unwrap_or_else(anonymous_user_id);
        let cancel = state.shutdown.child_token();

        tracing::info!(
            user_id = %user_id,
            authenticated = identity.user_id().is_some(),
            "Session opened"
        );

        deliver(
            &outbound,
            &cancel,
            ServerEvent::System(SystemNotice::connected(user_id.clone())),
        )
        .await;

        let prompt = random_prompt();
        let greeting = Message::assistant(Uuid::new_v4(), prompt.text);
        state.history.append(&user_id, greeting.clone()).await;
        deliver(&outbound, &cancel, ServerEvent::Message(greeting)).await;

        let (turns, queue) = mpsc::channel(TURN_QUEUE_DEPTH);
        let worker = tokio::spawn(run_turn_worker(
            user_id.clone(),
            state.history.clone(),
            state.completion.clone(),
            outbound.clone(),
            cancel.clone(),
            queue,
        ));

        Self {
            user_id,
            history: state.history.clone(),
            outbound,
            turns,
            cancel,
            worker,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Token that fires when this session is closed or the server shuts down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Record and echo a user fragment, then queue its assistant turn.
    /// Blank fragments, and any arriving once the session is cancelled, are
    /// dropped.
    ///
    /// The turn remembers where its user entry landed in history, so its
    /// context never includes fragments submitted after it.
    pub async fn submit_fragment(&self, fragment: String) {
        if fragment.trim().is_empty() {
            tracing::debug!(user_id = %self.user_id, "Ignoring blank fragment");
            return;
        }
        if self.cancel.is_cancelled() {
            tracing::debug!(user_id = %self.user_id, "Session closing, fragment dropped");
            return;
        }

        let id = Uuid::new_v4();
        let message = Message::user(id, fragment.as_str());
        let position = self.history.append(&self.user_id, message.clone()).await;
        deliver(&self.outbound, &self.cancel, ServerEvent::Message(message)).await;

        let turn = PendingTurn {
            id,
            position,
            fragment,
        };
        if !deliver(&self.turns, &self.cancel, turn).await {
            tracing::warn!(user_id = %self.user_id, turn_id = %id, "Session closing, fragment not relayed");
        }
    }

    /// Cancel in-flight work and wait for the worker to settle every queued
    /// turn.
    pub async fn close(self) {
        self.cancel.cancel();
        self.finish().await;
    }

    /// Stop accepting fragments and wait for queued turns to complete
    /// normally.
    pub async fn drain(self) {
        self.finish().await;
    }

    async fn finish(self) {
        let Self {
            user_id,
            turns,
            worker,
            ..
        } = self;
        drop(turns);
        if let Err(e) = worker.await {
            tracing::error!(user_id = %user_id, error = %e, "Turn worker panicked");
        }
        tracing::info!(user_id = %user_id, "Session closed");
    }
}

async fn run_turn_worker(
    user_id: String,
    history: HistoryStore,
    backend: Arc<dyn CompletionBackend>,
    outbound: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
    mut queue: mpsc::Receiver<PendingTurn>,
) {
    let ctx = TurnContext {
        user_id: &user_id,
        history: &history,
        backend: backend.as_ref(),
        outbound: &outbound,
        cancel: &cancel,
    };

    while let Some(turn) = queue.recv().await {
        let outcome = run_turn(&ctx, &turn).await;
        tracing::debug!(user_id = %user_id, turn_id = %turn.id, outcome = ?outcome, "Turn settled");
        if outcome == TurnOutcome::Cancelled {
            tracing::info!(user_id = %user_id, turn_id = %turn.id, "Turn cancelled");
        }
    }
}
