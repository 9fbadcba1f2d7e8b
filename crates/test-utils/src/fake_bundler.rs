use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, mpsc};

use devrunner::bundler::{BuildEvent, BuildHandle, BuildMode, BuildRequest, Bundler};
use devrunner::errors::Result;

/// What the fake was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundlerCall {
    Compile(String),
    /// A rebuild request arrived on a handle (dependency rebuilt).
    Rebuild(String),
}

#[derive(Default)]
struct Inner {
    calls: Mutex<Vec<BundlerCall>>,
    failing: Mutex<HashSet<String>>,
    held: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    emitters: Mutex<HashMap<String, mpsc::Sender<BuildEvent>>>,
    changed: Notify,
}

impl Inner {
    fn record(&self, call: BundlerCall) {
        self.calls.lock().unwrap().push(call);
        self.changed.notify_waiters();
    }
}

/// A bundler that never touches the filesystem:
/// - records every compile and rebuild request,
/// - finishes the first build immediately, unless told to fail or hold it,
/// - answers each rebuild request with another `BuildEnd`,
/// - lets tests push extra events with [`FakeBundler::emit`].
#[derive(Clone, Default)]
pub struct FakeBundler {
    inner: Arc<Inner>,
}

impl FakeBundler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first build of `source` reports `BuildFailed`.
    pub fn fail_first_build(self, source: &str) -> Self {
        self.inner.failing.lock().unwrap().insert(source.to_string());
        self
    }

    /// The first build of `source` emits nothing until [`emit`](Self::emit).
    pub fn hold_first_build(self, source: &str) -> Self {
        self.inner.held.lock().unwrap().insert(source.to_string());
        self
    }

    /// Compiling `source` panics inside the worker's task.
    pub fn panic_on_compile(self, source: &str) -> Self {
        self.inner.panicking.lock().unwrap().insert(source.to_string());
        self
    }

    pub fn calls(&self) -> Vec<BundlerCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// Sources compiled so far, in order.
    pub fn compiled(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BundlerCall::Compile(s) => Some(s),
                BundlerCall::Rebuild(_) => None,
            })
            .collect()
    }

    /// Push `event` on the live stream of `source`. `false` if there is none.
    pub async fn emit(&self, source: &str, event: BuildEvent) -> bool {
        let tx = self.inner.emitters.lock().unwrap().get(source).cloned();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Wait until `call` has been recorded.
    pub async fn wait_for(&self, call: BundlerCall) {
        loop {
            let notified = self.inner.changed.notified();
            if self.calls().contains(&call) {
                return;
            }
            notified.await;
        }
    }
}

impl Bundler for FakeBundler {
    fn compile(
        &self,
        request: BuildRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BuildHandle>> + Send + '_>> {
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            let name = request.source.name.clone();
            if inner.panicking.lock().unwrap().contains(&name) {
                panic!("fake bundler crashed while compiling {name}");
            }
            let (tx, rx) = mpsc::channel(16);
            let (rebuild_tx, mut rebuild_rx) = mpsc::channel::<()>(1);

            let first = if inner.failing.lock().unwrap().contains(&name) {
                Some(BuildEvent::BuildFailed {
                    error: format!("fake failure of {name}"),
                })
            } else if inner.held.lock().unwrap().contains(&name) {
                None
            } else {
                Some(BuildEvent::BuildEnd)
            };
            let held = first.is_none();

            if let Some(event) = first {
                let _ = tx.send(event).await;
            }

            if request.mode == BuildMode::Watch || held {
                inner.emitters.lock().unwrap().insert(name.clone(), tx.clone());
            }
            if request.mode == BuildMode::Watch {
                let inner = Arc::clone(&inner);
                let name = name.clone();
                tokio::spawn(async move {
                    while rebuild_rx.recv().await.is_some() {
                        inner.record(BundlerCall::Rebuild(name.clone()));
                        if tx.send(BuildEvent::BuildEnd).await.is_err() {
                            break;
                        }
                    }
                });
            }

            // Recorded last so a test that saw the call also sees the first event.
            inner.record(BundlerCall::Compile(name));

            Ok(BuildHandle {
                events: rx,
                rebuild: rebuild_tx,
                watcher: None,
            })
        })
    }
}
