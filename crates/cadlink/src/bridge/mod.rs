//! Command bridge into a single-threaded host application.
//!
//! Producers connect to the [`Listener`] from any thread. Payloads are handed
//! to a [`CommandQueue`] and executed by the [`Dispatcher`], which runs only
//! on the host's own thread. Control commands drive the
//! [`SessionSynchronizer`]; scripts pass through [`sanitize`] first.

mod client;
mod dispatcher;
mod error;
mod host;
mod listener;
mod queue;
mod sanitize;
mod sync;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cadlink_protocol::{DEFAULT_BRIDGE_PORT, MAX_PAYLOAD_BYTES};
use log::{info, warn};

pub use client::BridgeClient;
pub use dispatcher::{DirectSink, Dispatcher, PayloadProcessor, Processed, TickReport};
pub use error::{BridgeClientError, DispatchError, HandoffError, HostError, SyncError};
pub use host::{
    DEFAULT_DOCUMENT_EXTENSION, DocumentId, DocumentInfo, HeadlessHost, Host, Interpreter,
};
pub use listener::{Listener, PayloadSink};
pub use queue::CommandQueue;
pub use sanitize::sanitize;
pub use sync::{Resolution, SessionSynchronizer, SyncOutcome};

/// Runtime settings for one bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Loopback address the listener binds.
    pub addr: SocketAddr,
    /// How often the dispatcher drains the queue.
    pub poll_interval: Duration,
    /// Size of the single read per connection.
    pub max_payload_bytes: usize,
    /// Where session documents are exported.
    pub export_dir: PathBuf,
}

impl BridgeSettings {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_BRIDGE_PORT)),
            poll_interval: Duration::from_millis(100),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            export_dir: export_dir.into(),
        }
    }
}

/// How a bridge got wired to its host.
pub enum Attached<H> {
    /// Payloads are queued and executed on the host thread by the dispatcher.
    Scheduled {
        listener: Listener,
        dispatcher: Dispatcher<H>,
    },
    /// Payloads execute on the listener's threads. Unsafe for thread-affine hosts.
    Direct { listener: Listener },
}

impl<H> Attached<H> {
    pub fn listener(&self) -> &Listener {
        match self {
            Self::Scheduled { listener, .. } | Self::Direct { listener } => listener,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct { .. })
    }
}

/// Explicitly owned bridge: one queue, one listener, one consumer.
#[derive(Debug)]
pub struct Bridge {
    settings: BridgeSettings,
    queue: CommandQueue,
}

impl Bridge {
    pub fn new(settings: BridgeSettings) -> Self {
        Self {
            settings,
            queue: CommandQueue::new(),
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Wire the listener to the queue and hand back the dispatcher that must
    /// be driven from the host's own thread. The host need not be `Send`.
    pub fn scheduled<H: Host>(self, host: H) -> (Listener, Dispatcher<H>) {
        let listener = Listener::new(
            self.settings.addr,
            Arc::new(self.queue.clone()),
            self.settings.max_payload_bytes,
        );
        let processor = PayloadProcessor::new(host, self.synchronizer());
        let dispatcher = Dispatcher::new(processor, self.queue, self.settings.poll_interval);
        info!(
            "Execution manager using scheduled dispatch every {}ms",
            self.settings.poll_interval.as_millis()
        );
        (listener, dispatcher)
    }

    /// Wire the listener straight to the host, bypassing the queue.
    pub fn direct<H: Host + Send + 'static>(self, host: H) -> Listener {
        warn!(
            "Scheduled dispatch unavailable: falling back to direct, non-thread-safe execution. \
             Payloads will run on listener threads and may corrupt host state."
        );
        let processor = PayloadProcessor::new(host, self.synchronizer());
        Listener::new(
            self.settings.addr,
            Arc::new(DirectSink::new(processor)),
            self.settings.max_payload_bytes,
        )
    }

    /// Pick scheduled dispatch when the host supports it, else the direct fallback.
    pub fn attach<H: Host + Send + 'static>(self, host: H) -> Attached<H> {
        if host.supports_scheduled_dispatch() {
            let (listener, dispatcher) = self.scheduled(host);
            Attached::Scheduled {
                listener,
                dispatcher,
            }
        } else {
            Attached::Direct {
                listener: self.direct(host),
            }
        }
    }

    fn synchronizer(&self) -> SessionSynchronizer {
        SessionSynchronizer::new(self.settings.export_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Host that cannot be driven from a scheduled tick.
    #[derive(Default)]
    struct UnscheduledHost(HeadlessHost);

    impl Host for UnscheduledHost {
        fn documents(&self) -> Vec<DocumentInfo> {
            self.0.documents()
        }
        fn active_document(&self) -> Option<DocumentId> {
            self.0.active_document()
        }
        fn new_document(&mut self, name: Option<&str>) -> Result<DocumentId, HostError> {
            self.0.new_document(name)
        }
        fn set_label(&mut self, id: &DocumentId, label: &str) -> Result<(), HostError> {
            self.0.set_label(id, label)
        }
        fn activate(&mut self, id: &DocumentId) -> Result<(), HostError> {
            self.0.activate(id)
        }
        fn save_as(&mut self, id: &DocumentId, path: &Path) -> Result<(), HostError> {
            self.0.save_as(id, path)
        }
        fn open(&mut self, path: &Path) -> Result<DocumentId, HostError> {
            self.0.open(path)
        }
        fn run_script(&mut self, code: &str) -> Result<(), HostError> {
            self.0.run_script(code)
        }
        fn supports_scheduled_dispatch(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_default_settings_use_loopback_and_fixed_port() {
        let settings = BridgeSettings::new("/tmp/exports");
        assert!(settings.addr.ip().is_loopback());
        assert_eq!(settings.addr.port(), 6666);
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
        assert_eq!(settings.max_payload_bytes, 65536);
    }

    #[test]
    fn test_attach_prefers_scheduled_dispatch() {
        let dir = TempDir::new().unwrap();
        let bridge = Bridge::new(BridgeSettings::new(dir.path()));
        let attached = bridge.attach(HeadlessHost::new());
        assert!(!attached.is_direct());
    }

    #[test]
    fn test_attach_falls_back_to_direct_when_unsupported() {
        let dir = TempDir::new().unwrap();
        let bridge = Bridge::new(BridgeSettings::new(dir.path()));
        let attached = bridge.attach(UnscheduledHost::default());
        assert!(attached.is_direct());
        assert_eq!(attached.listener().addr().port(), 6666);
    }

    #[test]
    fn test_scheduled_listener_feeds_the_dispatcher_queue() {
        let dir = TempDir::new().unwrap();
        let bridge = Bridge::new(BridgeSettings::new(dir.path()));
        let queue = bridge.queue().clone();
        let (_listener, mut dispatcher) = bridge.scheduled(HeadlessHost::new());

        queue.enqueue(cadlink_protocol::Payload::Script("a = 1".to_string()));
        let report = dispatcher.tick();
        assert_eq!(report.scripts_executed, 1);
    }
}
