use crate::engine::Overseer;
use async_trait::async_trait;
use overseer_core::Message;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// An in-process worker that answers Request messages.
///
/// The reply must reference the same task id with sender and recipient
/// swapped; the [`overseer_core::Protocol`] response and error constructors
/// do this.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// Perform the requested task and return a Response or Error.
    async fn handle(&self, request: Message) -> Message;
}

/// Drain the dispatch queue.
///
/// `overseer` keeps the queue's sender alive, so the loop only ends when the
/// spawned task is aborted.
///
/// Requests whose task became terminal while queued are skipped. Requests
/// for agents registered with a handler are executed on their own tokio task
/// and the reply is fed back into [`Overseer::handle_response`]; any other
/// request is left to an external transport.
pub async fn run_dispatcher(overseer: Overseer, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(request) = rx.recv().await {
        let task_id = request.task_id().to_string();
        if overseer.is_task_terminal(&task_id) {
            debug!(task_id = %task_id, "Skipping dispatch for terminal task");
            continue;
        }

        let Some(handler) = overseer.handler_for(request.agent_to()) else {
            info!(
                task_id = %task_id,
                agent = %request.agent_to(),
                "Request awaits external transport"
            );
            continue;
        };

        debug!(task_id = %task_id, agent = %request.agent_to(), "Dispatching request");
        let overseer = overseer.clone();
        tokio::spawn(async move {
            let reply = handler.handle(request).await;
            if let Err(e) = overseer.handle_response(reply) {
                error!(task_id = %task_id, error = %e, "Rejected worker reply");
            }
        });
    }
    debug!("Dispatch queue closed");
}
