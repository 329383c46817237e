//! Relay - one assistant turn from fragment to final message
//!
//! A turn reads the user's history, opens a streaming completion, forwards
//! every chunk to the session's outbound queue under the turn id, and closes
//! with exactly one final `message` event:
//! - `Streaming → Finalized` when the upstream stream ends: the assembled
//!   assistant message is appended to history and emitted.
//! - `Streaming → Failed` on any upstream error or cancellation: an `error`
//!   message with fixed content is appended (and emitted if anyone listens).

use futures::StreamExt;
use journal_core::{
    ChatTurn, CompletionBackend, Message, MessageKind, ServerEvent, StreamChunk,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::subsystems::history::HistoryStore;

/// Fixed instruction prepended to every conversational completion.
pub const SYSTEM_INSTRUCTION: &str = "You are helping someone talk about their day. \
Encourage them to express how they feel. Give tips on what to talk about. \
Do not dwell on one topic. Keep your responses 1-2 sentence max. \
Start your response with 'Talk about ...'";

/// Content of the error message that replaces a failed turn.
pub const ERROR_FALLBACK: &str = "Error processing message";

/// A fragment waiting for its assistant turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub id: Uuid,
    /// Position of the turn's own user entry in the user's history.
    pub position: usize,
    pub fragment: String,
}

/// Build the model context for a turn: system instruction, the history that
/// precedes the fragment, then the fragment as the final user turn.
///
/// Entries before `position` are taken as they are. Past it, only replies are
/// kept: those belong to earlier turns that settled after this fragment was
/// recorded, while user entries there are later fragments still queued.
pub fn build_context(history: &[Message], position: usize, fragment: &str) -> Vec<ChatTurn> {
    let mut context = Vec::with_capacity(history.len() + 2);
    context.push(ChatTurn::system(SYSTEM_INSTRUCTION));
    context.extend(
        history
            .iter()
            .enumerate()
            .filter(|(i, m)| *i < position || m.kind != MessageKind::User)
            .filter_map(|(_, m)| ChatTurn::from_history(m)),
    );
    context.push(ChatTurn::user(fragment));
    context
}

/// Queue an event unless `cancel` fires first. Returns whether it was queued.
pub async fn deliver<T>(tx: &mpsc::Sender<T>, cancel: &CancellationToken, value: T) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(value) => sent.is_ok(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnState {
    Streaming { chunks: Vec<String> },
    Finalized,
    Failed,
}

/// State machine for one in-flight assistant turn.
#[derive(Debug)]
pub struct Turn {
    id: Uuid,
    state: TurnState,
}

impl Turn {
    pub fn begin(id: Uuid) -> Self {
        Self {
            id,
            state: TurnState::Streaming { chunks: Vec::new() },
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    /// Record a chunk. Returns the wire chunk, or `None` once the turn is over.
    pub fn push_chunk(&mut self, chunk: String) -> Option<StreamChunk> {
        match &mut self.state {
            TurnState::Streaming { chunks } => {
                let event = StreamChunk::new(self.id, chunk.as_str());
                chunks.push(chunk);
                Some(event)
            }
            _ => None,
        }
    }

    /// `Streaming → Finalized`. Returns the assembled assistant message the
    /// first time only.
    pub fn finalize(&mut self) -> Option<Message> {
        match std::mem::replace(&mut self.state, TurnState::Finalized) {
            TurnState::Streaming { chunks } => Some(Message::assistant(self.id, chunks.concat())),
            previous => {
                self.state = previous;
                None
            }
        }
    }

    /// `Streaming → Failed`. Returns the error message the first time only.
    pub fn fail(&mut self) -> Option<Message> {
        match std::mem::replace(&mut self.state, TurnState::Failed) {
            TurnState::Streaming { .. } => Some(Message::error(self.id, ERROR_FALLBACK)),
            previous => {
                self.state = previous;
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Finalized,
    Failed,
    Cancelled,
}

/// Everything a turn needs besides its fragment.
pub struct TurnContext<'a> {
    pub user_id: &'a str,
    pub history: &'a HistoryStore,
    pub backend: &'a dyn CompletionBackend,
    pub outbound: &'a mpsc::Sender<ServerEvent>,
    pub cancel: &'a CancellationToken,
}

/// Run one turn to a terminal state. Never returns without appending exactly
/// one assistant or error message for the turn's id.
pub async fn run_turn(ctx: &TurnContext<'_>, pending: &PendingTurn) -> TurnOutcome {
    let turn_id = pending.id;
    let mut turn = Turn::begin(turn_id);
    let context = build_context(
        &ctx.history.read(ctx.user_id).await,
        pending.position,
        &pending.fragment,
    );

    let opened = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        opened = ctx.backend.stream_chat(context) => Some(opened),
    };
    let mut stream = match opened {
        None => return fail_turn(ctx, &mut turn, TurnOutcome::Cancelled).await,
        Some(Ok(stream)) => stream,
        Some(Err(e)) => {
            tracing::error!(
                user_id = %ctx.user_id,
                turn_id = %turn_id,
                backend = ctx.backend.name(),
                error = %e,
                "Completion request failed"
            );
            return fail_turn(ctx, &mut turn, TurnOutcome::Failed).await;
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                tracing::debug!(turn_id = %turn_id, "Turn cancelled mid-stream");
                return fail_turn(ctx, &mut turn, TurnOutcome::Cancelled).await;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                if let Some(event) = turn.push_chunk(chunk) {
                    // Undelivered while cancelled; the next poll settles the turn.
                    deliver(ctx.outbound, ctx.cancel, ServerEvent::Chunk(event)).await;
                }
            }
            Some(Err(e)) => {
                tracing::error!(
                    user_id = %ctx.user_id,
                    turn_id = %turn_id,
                    error = %e,
                    "Completion stream failed"
                );
                return fail_turn(ctx, &mut turn, TurnOutcome::Failed).await;
            }
            None => break,
        }
    }

    if let Some(message) = turn.finalize() {
        ctx.history.append(ctx.user_id, message.clone()).await;
        deliver(ctx.outbound, ctx.cancel, ServerEvent::Message(message)).await;
    }
    TurnOutcome::Finalized
}

async fn fail_turn(ctx: &TurnContext<'_>, turn: &mut Turn, outcome: TurnOutcome) -> TurnOutcome {
    if let Some(message) = turn.fail() {
        ctx.history.append(ctx.user_id, message.clone()).await;
        if outcome != TurnOutcome::Cancelled {
            deliver(ctx.outbound, ctx.cancel, ServerEvent::Message(message)).await;
        }
    }
    outcome
}
