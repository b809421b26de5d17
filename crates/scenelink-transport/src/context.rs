//! Background execution contexts.
//!
//! Worker threads and embedded documents both run on a dedicated OS thread
//! with a single-threaded Tokio runtime, so everything inside one context is
//! cooperative and only cross-context messages cross thread boundaries.

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::TransportError;
use crate::port::{lock, MessagePort};

/// Values a tool keeps alive for as long as its context runs.
///
/// Channels only hold their receive callbacks, so a tool stores whatever
/// those callbacks refer to here. Everything is dropped when the context
/// stops.
#[derive(Clone, Default)]
pub struct Globals {
    values: Arc<Mutex<Vec<Box<dyn Any + Send>>>>,
}

impl Globals {
    pub fn keep<T: Send + 'static>(&self, value: T) {
        lock(&self.values).push(Box::new(value));
    }

    pub fn len(&self) -> usize {
        lock(&self.values).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything kept so far.
    pub(crate) fn clear(&self) {
        let values = std::mem::take(&mut *lock(&self.values));
        drop(values);
    }
}

/// Spawn a context thread.
///
/// `setup` runs inside the context's runtime, so handlers it installs are
/// pumped there. The runtime keeps running until `shutdown` is cancelled;
/// afterwards the handlers of `ports` are cleared and the context's
/// [`Globals`] dropped.
pub(crate) fn spawn_context<F>(
    name: String,
    shutdown: CancellationToken,
    ports: Vec<Arc<MessagePort>>,
    setup: F,
) -> Result<JoinHandle<()>, TransportError>
where
    F: FnOnce(Globals) + Send + 'static,
{
    let globals = Globals::default();
    let handle = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(context = %name, error = %e, "Failed to build context runtime");
                    return;
                }
            };

            let kept = globals.clone();
            runtime.block_on(async move {
                setup(kept);
                shutdown.cancelled().await;
            });

            for port in &ports {
                port.clear();
            }
            globals.clear();
            debug!(context = %name, "Execution context stopped");
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Flag(Arc<Mutex<bool>>);

    impl Drop for Flag {
        fn drop(&mut self) {
            *lock(&self.0) = true;
        }
    }

    #[test]
    fn test_globals_live_until_shutdown() {
        let dropped = Arc::new(Mutex::new(false));
        let flag = Flag(Arc::clone(&dropped));
        let shutdown = CancellationToken::new();
        let (tx, rx) = std::sync::mpsc::channel();

        let thread = spawn_context("ctx".into(), shutdown.clone(), Vec::new(), move |globals| {
            globals.keep(flag);
            let _ = tx.send(globals.len());
        })
        .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        assert!(!*lock(&dropped));

        shutdown.cancel();
        thread.join().unwrap();
        assert!(*lock(&dropped));
    }
}
