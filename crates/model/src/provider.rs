use std::error::Error;

use crate::error::ErrorKind;
use crate::request::CompletionRequest;
use crate::response::CompletionResponse;

/// The error type for a completion provider.
pub trait ProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;

    /// Returns the response body the provider sent along with a
    /// rejection, if any.
    fn detail(&self) -> Option<&str> {
        None
    }
}

/// A type that represents a chat-completion provider, which streams a
/// reply for a list of chat turns.
///
/// Once the provider is created, it should behave like a stateless object.
/// It can still have internal state, but callers should not rely on it,
/// and the provider should be prepared for being dropped anytime.
pub trait CompletionProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ProviderError;

    /// The response type for this provider.
    type Response: CompletionResponse<Error = Self::Error>;

    /// Sends a streaming completion request.
    ///
    /// The returned future resolves once the provider has accepted the
    /// request, that is, after the response status is known but before
    /// any of the body is read. A non-success status must resolve to an
    /// error of the [`ErrorKind::Rejected`] kind.
    fn send_request(
        &self,
        req: &CompletionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}
