//! Result delivery to callers.

use tokio::sync::mpsc;

use crate::error::FetchError;

/// A parsed result handed to a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    pub value: T,
    /// A soft-stale cached result; a fresher one (or an error) follows.
    pub intermediate: bool,
}

/// Receives the outcome of a request on the delivery context.
///
/// `on_response` may be called once with `intermediate: true` before the
/// final call. At most one final `on_response` or `on_error` happens, and
/// neither happens after the request is cancelled.
pub trait ResponseListener<T>: Send + Sync {
    fn on_response(&self, response: Response<T>);

    fn on_error(&self, error: FetchError);
}

type ResponseFn<T> = Box<dyn Fn(Response<T>) + Send + Sync>;
type ErrorFn = Box<dyn Fn(FetchError) + Send + Sync>;

/// Listener built from closures.
pub struct FnListener<T> {
    on_response: Option<ResponseFn<T>>,
    on_error: Option<ErrorFn>,
}

impl<T> FnListener<T> {
    pub fn new() -> Self {
        Self {
            on_response: None,
            on_error: None,
        }
    }

    pub fn on_response(mut self, f: impl Fn(Response<T>) + Send + Sync + 'static) -> Self {
        self.on_response = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(FetchError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl<T> Default for FnListener<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResponseListener<T> for FnListener<T> {
    fn on_response(&self, response: Response<T>) {
        if let Some(f) = &self.on_response {
            f(response);
        }
    }

    fn on_error(&self, error: FetchError) {
        match &self.on_error {
            Some(f) => f(error),
            None => tracing::debug!(error = %error, "request failed with no error listener"),
        }
    }
}

/// Everything a channel listener forwards.
#[derive(Debug)]
pub enum Delivery<T> {
    Response(Response<T>),
    Error(FetchError),
}

impl<T> Delivery<T> {
    pub fn is_final(&self) -> bool {
        match self {
            Self::Response(r) => !r.intermediate,
            Self::Error(_) => true,
        }
    }

    pub fn into_result(self) -> Result<Response<T>, FetchError> {
        match self {
            Self::Response(r) => Ok(r),
            Self::Error(e) => Err(e),
        }
    }
}

/// Forwards deliveries into an unbounded tokio channel, so async callers
/// can `recv().await` results produced on dispatcher threads.
pub struct ChannelListener<T> {
    tx: mpsc::UnboundedSender<Delivery<T>>,
}

impl<T: Send> ResponseListener<T> for ChannelListener<T> {
    fn on_response(&self, response: Response<T>) {
        // Receiver dropped: the caller lost interest.
        let _ = self.tx.send(Delivery::Response(response));
    }

    fn on_error(&self, error: FetchError) {
        let _ = self.tx.send(Delivery::Error(error));
    }
}

pub type DeliveryReceiver<T> = mpsc::UnboundedReceiver<Delivery<T>>;

pub fn channel_listener<T>() -> (ChannelListener<T>, DeliveryReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelListener { tx }, rx)
}
