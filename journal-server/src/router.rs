use journal_core::ClientEvent;

use crate::session::Session;

/// Dispatch one inbound session frame.
///
/// Unparseable frames and unknown events are logged and ignored; the session
/// stays open.
pub async fn handle_client_frame(session: &Session, frame: &str) {
    match ClientEvent::from_frame(frame) {
        Ok(event) => handle_client_event(session, event).await,
        Err(e) => {
            tracing::warn!(
                user_id = %session.user_id(),
                error = %e,
                "Ignoring unrecognised session frame"
            );
        }
    }
}

pub async fn handle_client_event(session: &Session, event: ClientEvent) {
    match event {
        ClientEvent::Message(fragment) => session.submit_fragment(fragment).await,
    }
}
