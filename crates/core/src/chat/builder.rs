use std::sync::Arc;
use std::time::Duration;

use persona_relay_model::{CompletionProvider, Retriever};

use super::ChatService;
use crate::log_sink::LogSink;
use crate::prompt::Persona;
use crate::relay::{Relay, RelayOptions};

/// [`ChatService`] builder.
pub struct ChatServiceBuilder {
    persona: Persona,
    relay: Option<Relay>,
    relay_options: RelayOptions,
    retriever: Option<Arc<dyn Retriever>>,
    retrieval_timeout: Duration,
    log_sink: LogSink,
}

impl ChatServiceBuilder {
    /// Creates a new builder speaking as `persona`.
    ///
    /// Without a provider, every chat request fails with a
    /// configuration error.
    #[inline]
    pub fn with_persona(persona: Persona) -> Self {
        Self {
            persona,
            relay: None,
            relay_options: Default::default(),
            retriever: None,
            retrieval_timeout: Duration::from_secs(5),
            log_sink: LogSink::disabled(),
        }
    }

    /// Sets the upstream completion provider.
    #[inline]
    pub fn with_provider<P: CompletionProvider + 'static>(
        mut self,
        provider: P,
    ) -> Self {
        self.relay = Some(Relay::new(provider));
        self
    }

    /// Sets the upstream time limits.
    #[inline]
    pub fn with_relay_options(mut self, options: RelayOptions) -> Self {
        self.relay_options = options;
        self
    }

    /// Enables retrieval of similar past exchanges.
    #[inline]
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Bounds how long retrieval may take before it is skipped.
    #[inline]
    pub fn with_retrieval_timeout(mut self, limit: Duration) -> Self {
        self.retrieval_timeout = limit;
        self
    }

    /// Sets where completed exchanges are logged.
    #[inline]
    pub fn with_log_sink(mut self, log_sink: LogSink) -> Self {
        self.log_sink = log_sink;
        self
    }

    /// Builds the service.
    pub fn build(self) -> ChatService {
        let Self {
            persona,
            relay,
            relay_options,
            retriever,
            retrieval_timeout,
            log_sink,
        } = self;
        ChatService {
            persona,
            relay: relay.map(|relay| relay.with_options(relay_options)),
            retriever,
            retrieval_timeout,
            log_sink,
        }
    }
}
