mod builder;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use persona_relay_model::Retriever;

use crate::conversation::{ConversationRequest, build_completion_request};
use crate::error::Error;
use crate::log_sink::LogSink;
use crate::prompt::{Persona, assemble_system_prompt};
use crate::relay::{Relay, RelayOutcome, RelayStream};
use crate::retrieval::fetch_context;
pub use builder::ChatServiceBuilder;

/// Answers chat requests in the persona's voice.
///
/// Each request is handled independently: retrieve context, assemble
/// the prompt, relay the upstream stream, then log the exchange in the
/// background once the stream completes.
#[derive(Clone)]
pub struct ChatService {
    persona: Persona,
    relay: Option<Relay>,
    retriever: Option<Arc<dyn Retriever>>,
    retrieval_timeout: Duration,
    log_sink: LogSink,
}

impl ChatService {
    /// Returns the persona this service speaks as.
    #[inline]
    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Starts answering `req`.
    ///
    /// The message is validated before anything else, so an invalid
    /// request never reaches the retriever or the upstream. Errors are
    /// only returned before streaming starts.
    pub async fn start(
        &self,
        req: ConversationRequest,
    ) -> Result<RelayStream, Error> {
        if req.message.trim().is_empty() {
            return Err(
                Error::invalid_input().with_reason("message is required")
            );
        }
        let Some(relay) = &self.relay else {
            error!("upstream api key is not configured");
            return Err(
                Error::configuration().with_reason("upstream is not configured")
            );
        };

        let context = fetch_context(
            self.retriever.as_deref(),
            &req.message,
            self.retrieval_timeout,
        )
        .await;
        let system_prompt = assemble_system_prompt(&self.persona, &context);
        let completion_req =
            build_completion_request(system_prompt, &req.history, &req.message);

        let ConversationRequest {
            message,
            session_id,
            ..
        } = req;
        let log_sink = self.log_sink.clone();
        let on_finish = move |outcome: RelayOutcome| match outcome {
            RelayOutcome::Completed(reply) if !reply.is_empty() => {
                log_sink.dispatch(session_id.as_deref(), message, reply);
            }
            RelayOutcome::Completed(_) => {
                debug!("upstream sent no reply text, nothing to log");
            }
            RelayOutcome::Aborted { reason, .. } => {
                debug!("stream aborted ({reason:?}), exchange not logged");
            }
        };
        relay.open(completion_req, on_finish).await
    }
}
