#![allow(dead_code)]

use sockloop::{Backend, EventLoop, Handler, LoopStats, LoopType, StopHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::Dispatch;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

/// A loop running on its own thread.
pub struct Running<H> {
    pub stop: StopHandle,
    thread: JoinHandle<(H, LoopStats)>,
}

impl<H> Running<H> {
    /// Stops the loop and hands back the handler with the final counters.
    pub fn finish(self) -> (H, LoopStats) {
        self.stop.stop();
        self.join()
    }

    /// Waits for a loop that stops by itself.
    pub fn join(self) -> (H, LoopStats) {
        self.thread.join().expect("event loop thread panicked")
    }
}

pub fn spawn<H, F>(build: F) -> Running<H>
where
    H: Handler + Send + 'static,
    F: FnOnce() -> EventLoop<H> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let thread = thread::spawn(move || {
        let mut event_loop = build();
        tx.send(event_loop.stop_handle()).expect("send stop handle");
        event_loop.run().expect("event loop failed");
        let stats = event_loop.stats();
        (event_loop.into_handler(), stats)
    });

    let stop = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("event loop did not start");
    Running { stop, thread }
}

/// Every backend compiled for this platform.
pub fn loop_types() -> Vec<LoopType> {
    Backend::available()
        .iter()
        .map(|backend| match backend {
            Backend::Select => LoopType::Select,
            Backend::Poll => LoopType::Poll,
            #[cfg(target_os = "linux")]
            Backend::Epoll => LoopType::Epoll,
        })
        .collect()
}

struct WarnCounter(Arc<AtomicUsize>);

impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A logger counting warnings, for injection into one loop.
pub fn warn_counting_dispatch() -> (Dispatch, Arc<AtomicUsize>) {
    let warnings = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
    (Dispatch::new(subscriber), warnings)
}
