//! Embedded-document channels.
//!
//! The host talks to an embedded document through [`EmbeddedChannel`], which
//! posts into the frame's content window and listens on the host window. The
//! document talks back through [`ParentChannel`]. Note that every embedded
//! channel listens on the same host window, so each one sees the messages of
//! all documents; the protocol layer filters them by origin name.

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::context::{spawn_context, Globals};
use crate::error::TransportError;
use crate::port::{lock, Callback, ListenerId};
use crate::window::{Frame, Window};

/// Messages this channel heard on the host window before it had a callback.
#[derive(Default)]
struct Inbox {
    callback: Option<Callback>,
    pending: VecDeque<Value>,
}

impl Inbox {
    fn deliver(inbox: &Mutex<Inbox>, message: Value) {
        let callback = {
            let mut inbox = lock(inbox);
            match &inbox.callback {
                Some(callback) => Arc::clone(callback),
                None => {
                    inbox.pending.push_back(message);
                    return;
                }
            }
        };
        callback(message);
    }
}

/// Host side of an embedded document.
pub struct EmbeddedChannel {
    frame: Arc<Frame>,
    host: Arc<Window>,
    target_origin: String,
    inbox: Arc<Mutex<Inbox>>,
    listener: ListenerId,
}

impl EmbeddedChannel {
    /// Create an embedded document at `location` inside `host` and run
    /// `setup` in the document's own context with its globals.
    ///
    /// The channel listens on the host window before the document starts, so
    /// whatever the document posts is kept until a receive callback is set.
    pub fn spawn<F>(
        host: &Arc<Window>,
        location: Url,
        target_origin: impl Into<String>,
        setup: F,
    ) -> Result<Self, TransportError>
    where
        F: FnOnce(Arc<Window>, Globals) + Send + 'static,
    {
        let document = Window::embedded(location, host);
        let shutdown = CancellationToken::new();
        let thread_document = Arc::clone(&document);
        let thread_name = format!("frame-{}", document.location().path());
        let document_port = Arc::clone(document.port());

        let channel = Self::new(
            Arc::new(Frame::new(document, shutdown.clone())),
            Arc::clone(host),
            target_origin,
        );
        // The thread is never joined: it exits once the frame is detached.
        spawn_context(thread_name, shutdown, vec![document_port], move |globals| {
            setup(thread_document, globals)
        })?;
        debug!(src = %channel.frame.src(), "Attached frame");
        Ok(channel)
    }

    /// Wrap an existing frame. Messages reaching `host` from now on are kept
    /// for this channel.
    pub fn new(frame: Arc<Frame>, host: Arc<Window>, target_origin: impl Into<String>) -> Self {
        let inbox = Arc::new(Mutex::new(Inbox::default()));
        let listening = Arc::clone(&inbox);
        let listener = host
            .port()
            .register_listener(Arc::new(move |message| Inbox::deliver(&listening, message)));
        Self {
            frame,
            host,
            target_origin: target_origin.into(),
            inbox,
            listener,
        }
    }

    pub fn frame(&self) -> &Arc<Frame> {
        &self.frame
    }

    pub fn target_origin(&self) -> &str {
        &self.target_origin
    }

    pub fn send(&self, message: Value) -> Result<(), TransportError> {
        let window = self
            .frame
            .content_window()
            .ok_or(TransportError::NoContentWindow)?;
        window.post_message(message, &self.target_origin)
    }

    /// Install the callback, handing it everything kept so far in order.
    pub fn set_receive_callback(&self, callback: Callback) -> Result<(), TransportError> {
        self.host.port().start()?;
        loop {
            let backlog = {
                let mut inbox = lock(&self.inbox);
                if inbox.pending.is_empty() {
                    if inbox.callback.replace(Arc::clone(&callback)).is_some() {
                        warn!(src = %self.frame.src(), "Changing receive callback");
                    }
                    return Ok(());
                }
                std::mem::take(&mut inbox.pending)
            };
            debug!(src = %self.frame.src(), count = backlog.len(), "Delivering kept messages");
            for message in backlog {
                callback(message);
            }
        }
    }
}

impl Drop for EmbeddedChannel {
    fn drop(&mut self) {
        self.host.port().remove_listener(self.listener);
    }
}

/// Document side of an embedded document, talking to the embedding page.
pub struct ParentChannel {
    window: Arc<Window>,
    target_origin: String,
}

impl ParentChannel {
    pub fn new(window: Arc<Window>, target_origin: impl Into<String>) -> Self {
        Self {
            window,
            target_origin: target_origin.into(),
        }
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    pub fn send(&self, message: Value) -> Result<(), TransportError> {
        let parent = self.window.parent().ok_or(TransportError::NoParentWindow)?;
        parent.post_message(message, &self.target_origin)
    }

    pub fn set_receive_callback(&self, callback: Callback) -> Result<(), TransportError> {
        if self.window.parent().is_none() {
            return Err(TransportError::NoParentWindow);
        }
        if self.window.port().set_onmessage(callback)?.is_some() {
            warn!(location = %self.window.location(), "Changing receive callback");
        }
        Ok(())
    }
}
