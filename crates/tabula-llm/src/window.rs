//! Response window normalization.
//!
//! Agents rely on every turn being bracketed by exactly one
//! `ResponseCreated` and one `ResponseCompleted` with the same id. Events
//! that arrive before `response.created` are held until the service's id is
//! known. `ResponseCompleted` is emitted only once the inner stream ends, so
//! items the service sends after `response.completed` still reach the agent.
//! A local id is synthesized only when the service sent none at all.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use pin_project_lite::pin_project;
use tabula_core::ResponseId;
use tracing::debug;

use crate::provider::{ProtocolEvent, ProtocolEventStream, ProviderError};

type Item = Result<ProtocolEvent, ProviderError>;

const LOCAL_PREFIX: &str = "local_";

fn local_response_id() -> ResponseId {
    ResponseId::from(format!("{LOCAL_PREFIX}{}", ResponseId::new()))
}

/// Whether `id` was made up here rather than sent by the service.
///
/// Such ids bracket events but must never be sent back as a continuation token.
pub fn is_synthesized(id: &ResponseId) -> bool {
    id.as_str().starts_with(LOCAL_PREFIX)
}

pin_project! {
    /// Stream adapter that guarantees a well-formed created/completed window.
    pub struct ResponseWindow<S> {
        #[pin]
        inner: S,
        created: Option<ResponseId>,
        completed: Option<ResponseId>,
        held: Vec<ProtocolEvent>,
        finished: bool,
        pending: VecDeque<Item>,
    }
}

impl<S> ResponseWindow<S> {
    /// Wrap a raw turn stream.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            created: None,
            completed: None,
            held: Vec::new(),
            finished: false,
            pending: VecDeque::new(),
        }
    }
}

/// Open the window under `id` and release everything held before it.
fn open(
    created: &mut Option<ResponseId>,
    held: &mut Vec<ProtocolEvent>,
    pending: &mut VecDeque<Item>,
    id: ResponseId,
) {
    *created = Some(id.clone());
    pending.push_back(Ok(ProtocolEvent::ResponseCreated { response_id: id }));
    pending.extend(held.drain(..).map(Ok));
}

impl<S: Stream<Item = Item>> Stream for ResponseWindow<S> {
    type Item = Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Item>> {
        let mut this = self.project();
        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            let next = match this.inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(next) => next,
            };

            match next {
                Some(Ok(ProtocolEvent::ResponseCreated { response_id })) => {
                    if this.created.is_none() {
                        if !this.held.is_empty() {
                            debug!(
                                %response_id,
                                held = this.held.len(),
                                "releasing events received before response.created"
                            );
                        }
                        open(this.created, this.held, this.pending, response_id);
                    } else {
                        debug!(%response_id, "ignoring repeated response.created");
                    }
                }
                Some(Ok(ProtocolEvent::ResponseCompleted { response_id })) => {
                    if this.completed.is_none() {
                        *this.completed = Some(response_id);
                    }
                }
                Some(Ok(event)) => {
                    if this.completed.is_some() {
                        debug!("event after response.completed");
                    }
                    if this.created.is_some() {
                        return Poll::Ready(Some(Ok(event)));
                    }
                    this.held.push(event);
                }
                Some(Err(err)) => {
                    *this.finished = true;
                    if this.created.is_none() && !this.held.is_empty() {
                        let id = this.completed.take().unwrap_or_else(local_response_id);
                        open(this.created, this.held, this.pending, id);
                    }
                    this.pending.push_back(Err(err));
                }
                None => {
                    *this.finished = true;
                    if this.created.is_none() {
                        let id = this.completed.clone().unwrap_or_else(|| {
                            let id = local_response_id();
                            debug!(response_id = %id, "no response id from the service");
                            id
                        });
                        open(this.created, this.held, this.pending, id);
                    }
                    if this.completed.is_none() {
                        debug!("stream ended without response.completed");
                    }
                    if let Some(id) = this.created.clone() {
                        this.pending
                            .push_back(Ok(ProtocolEvent::ResponseCompleted { response_id: id }));
                    }
                }
            }
        }
    }
}

/// Box a turn stream behind a [`ResponseWindow`].
pub fn ensure_response_window(stream: ProtocolEventStream) -> ProtocolEventStream {
    Box::pin(ResponseWindow::new(stream))
}
