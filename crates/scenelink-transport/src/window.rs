//! Documents and embedded frames.
//!
//! A [`Window`] is a document context: it has a location, an origin derived
//! from it, an inbox and optionally the window that embeds it. A [`Frame`] is
//! the host-side element holding an embedded document; detaching it drops the
//! content window and stops the document's context.

use serde_json::Value;
use std::sync::{Arc, RwLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::error::TransportError;
use crate::port::{read, write, MessagePort};

/// Target origin that matches every document.
pub const ANY_ORIGIN: &str = "*";

/// Serialized origin (`scheme://host:port`) of a location.
pub fn origin_of(location: &Url) -> String {
    location.origin().ascii_serialization()
}

/// A document execution context.
pub struct Window {
    location: Url,
    origin: String,
    port: Arc<MessagePort>,
    parent: Option<Weak<Window>>,
}

impl Window {
    /// Create a document that is not embedded anywhere.
    pub fn top_level(location: Url) -> Arc<Self> {
        Arc::new(Self::build(location, None))
    }

    /// Create a document embedded in `parent`.
    pub fn embedded(location: Url, parent: &Arc<Window>) -> Arc<Self> {
        Arc::new(Self::build(location, Some(Arc::downgrade(parent))))
    }

    fn build(location: Url, parent: Option<Weak<Window>>) -> Self {
        let origin = origin_of(&location);
        let port = MessagePort::new(format!("window {}", location));
        Self {
            location,
            origin,
            port,
            parent,
        }
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The embedding document, if it still exists.
    pub fn parent(&self) -> Option<Arc<Window>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn port(&self) -> &Arc<MessagePort> {
        &self.port
    }

    /// Post a message to this document.
    ///
    /// Messages whose `target_origin` is neither `"*"` nor this document's
    /// origin are dropped without an error.
    pub fn post_message(&self, message: Value, target_origin: &str) -> Result<(), TransportError> {
        if target_origin != ANY_ORIGIN && target_origin != self.origin {
            trace!(
                origin = %self.origin,
                target_origin = %target_origin,
                "Target origin mismatch, message dropped"
            );
            return Ok(());
        }
        self.port.post(message)
    }
}

/// Host-side element that embeds a document.
pub struct Frame {
    src: Url,
    content: RwLock<Option<Arc<Window>>>,
    shutdown: CancellationToken,
}

impl Frame {
    pub(crate) fn new(content: Arc<Window>, shutdown: CancellationToken) -> Self {
        Self {
            src: content.location().clone(),
            content: RwLock::new(Some(content)),
            shutdown,
        }
    }

    pub fn src(&self) -> &Url {
        &self.src
    }

    /// The embedded document, or `None` once detached.
    pub fn content_window(&self) -> Option<Arc<Window>> {
        read(&self.content).clone()
    }

    /// Remove the document from the page and stop its context.
    pub fn detach(&self) {
        if write(&self.content).take().is_some() {
            debug!(src = %self.src, "Detached frame");
        }
        self.shutdown.cancel();
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(origin_of(&url("http://localhost:8080/tool_buoy/tool_buoy.html?letter=a")), "http://localhost:8080");
        assert_eq!(origin_of(&url("https://tools.example/x")), "https://tools.example");
    }

    #[test]
    fn test_parent_link_is_weak() {
        let host = Window::top_level(url("http://localhost/"));
        let child = Window::embedded(url("http://localhost/tool.html"), &host);
        assert!(child.parent().is_some());
        assert!(host.parent().is_none());

        drop(host);
        assert!(child.parent().is_none());
    }

    #[tokio::test]
    async fn test_target_origin_filtering() {
        let window = Window::top_level(url("http://localhost:8080/"));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        window
            .port()
            .set_onmessage(Arc::new(move |m| { let _ = tx.send(m); }))
            .unwrap();

        window.post_message(json!("dropped"), "https://elsewhere.example").unwrap();
        window.post_message(json!("exact"), "http://localhost:8080").unwrap();
        window.post_message(json!("any"), ANY_ORIGIN).unwrap();

        assert_eq!(rx.recv().await, Some(json!("exact")));
        assert_eq!(rx.recv().await, Some(json!("any")));
    }

    #[test]
    fn test_detach_clears_content_window() {
        let host = Window::top_level(url("http://localhost/"));
        let doc = Window::embedded(url("http://localhost/tool.html"), &host);
        let token = CancellationToken::new();
        let frame = Frame::new(doc, token.clone());

        assert!(frame.content_window().is_some());
        frame.detach();
        assert!(frame.content_window().is_none());
        assert!(token.is_cancelled());
    }
}
