//! Host-side payload processing.
//!
//! [`Dispatcher`] is owned by the host's own thread. Each tick drains the
//! command queue and processes every drained payload to completion, in
//! arrival order, before the next one starts. A failing payload is logged and
//! never stops the tick or the loop.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use cadlink_protocol::{ControlCommand, Payload};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use super::error::{DispatchError, HandoffError};
use super::host::Host;
use super::listener::PayloadSink;
use super::queue::CommandQueue;
use super::sanitize::sanitize;
use super::sync::{SessionSynchronizer, SyncOutcome};

/// Name given to the document created when a script arrives with none open.
const SCRATCH_DOCUMENT_NAME: &str = "Untitled";

/// Result of processing one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// A script ran; `bytes` is its sanitized length.
    Executed { bytes: usize },
    /// The script was empty after sanitizing.
    Skipped,
    /// A session synchronization completed.
    Synced(SyncOutcome),
}

/// Counters for one dispatcher tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub drained: usize,
    pub scripts_executed: usize,
    pub scripts_failed: usize,
    pub scripts_skipped: usize,
    pub syncs_completed: usize,
    pub syncs_failed: usize,
}

impl TickReport {
    pub fn failures(&self) -> usize {
        self.scripts_failed + self.syncs_failed
    }
}

/// Executes payloads against a host.
#[derive(Debug)]
pub struct PayloadProcessor<H> {
    host: H,
    synchronizer: SessionSynchronizer,
}

impl<H: Host> PayloadProcessor<H> {
    pub fn new(host: H, synchronizer: SessionSynchronizer) -> Self {
        Self { host, synchronizer }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    /// Process a single payload to completion.
    pub fn process(&mut self, payload: Payload) -> Result<Processed, DispatchError> {
        match payload {
            Payload::Control(ControlCommand::SyncSession {
                previous_id,
                current_id,
            }) => {
                let outcome =
                    self.synchronizer
                        .sync(&mut self.host, previous_id.as_deref(), &current_id)?;
                Ok(Processed::Synced(outcome))
            }
            Payload::Script(raw) => self.execute_script(&raw),
        }
    }

    fn execute_script(&mut self, raw: &str) -> Result<Processed, DispatchError> {
        let code = sanitize(raw);
        if code.is_empty() {
            debug!("Skipping empty script ({} raw bytes)", raw.len());
            return Ok(Processed::Skipped);
        }

        if self.host.active_document().is_none() {
            self.host
                .new_document(Some(SCRATCH_DOCUMENT_NAME))
                .map_err(DispatchError::NoDocument)?;
            self.host.refresh();
        }

        self.host
            .run_script(&code)
            .map_err(|source| DispatchError::Script {
                bytes: code.len(),
                source,
            })?;
        info!("Executed {} bytes of code.", code.len());
        Ok(Processed::Executed { bytes: code.len() })
    }
}

/// Single consumer of the command queue, bound to the host's thread.
#[derive(Debug)]
pub struct Dispatcher<H> {
    processor: PayloadProcessor<H>,
    queue: CommandQueue,
    poll_interval: Duration,
}

impl<H: Host> Dispatcher<H> {
    pub fn new(processor: PayloadProcessor<H>, queue: CommandQueue, poll_interval: Duration) -> Self {
        Self {
            processor,
            queue,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn host(&self) -> &H {
        self.processor.host()
    }

    pub fn host_mut(&mut self) -> &mut H {
        self.processor.host_mut()
    }

    pub fn into_host(self) -> H {
        self.processor.into_host()
    }

    /// Drain the queue and process everything drained, in order.
    pub fn tick(&mut self) -> TickReport {
        let drained = self.queue.drain_all();
        let mut report = TickReport {
            drained: drained.len(),
            ..TickReport::default()
        };

        for payload in drained {
            let is_script = matches!(payload, Payload::Script(_));
            match self.processor.process(payload) {
                Ok(Processed::Executed { .. }) => report.scripts_executed += 1,
                Ok(Processed::Skipped) => report.scripts_skipped += 1,
                Ok(Processed::Synced(outcome)) => {
                    debug!("Session document now {} ({})", outcome.label, outcome.document);
                    report.syncs_completed += 1;
                }
                Err(e) if is_script => {
                    error!("Execution error: {}", e);
                    report.scripts_failed += 1;
                }
                Err(e) => {
                    error!("Error switching/creating session document: {}", e);
                    report.syncs_failed += 1;
                }
            }
        }

        report
    }

    /// Tick every poll interval on the calling thread until `shutdown` fires,
    /// then drain once more so nothing accepted is left behind.
    pub fn run(&mut self, shutdown: &CancellationToken) {
        info!(
            "Dispatcher running every {}ms on the host thread",
            self.poll_interval.as_millis()
        );
        while !shutdown.is_cancelled() {
            self.tick();
            std::thread::sleep(self.poll_interval);
        }
        let last = self.tick();
        info!("Dispatcher stopped after final drain of {} payload(s)", last.drained);
    }
}

/// Fallback sink that executes payloads on whichever thread received them.
///
/// Only used when the host cannot be driven from a scheduled tick. Host calls
/// then happen off the host's own thread, which hosts with thread-affine state
/// do not tolerate.
#[derive(Debug)]
pub struct DirectSink<H> {
    processor: Mutex<PayloadProcessor<H>>,
}

impl<H: Host> DirectSink<H> {
    pub fn new(processor: PayloadProcessor<H>) -> Self {
        Self {
            processor: Mutex::new(processor),
        }
    }
}

impl<H: Host + Send> PayloadSink for DirectSink<H> {
    fn submit(&self, payload: Payload) -> Result<(), HandoffError> {
        warn!(
            "Executing {} payload directly on {:?}; host state is not thread-confined",
            payload.kind(),
            std::thread::current().id()
        );
        let mut processor = self.processor.lock().unwrap_or_else(PoisonError::into_inner);
        processor.process(payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::error::HostError;
    use crate::bridge::host::{DocumentId, DocumentInfo, HeadlessHost};
    use std::path::Path;
    use tempfile::TempDir;

    /// Headless host whose scripts fail when they contain `raise`.
    #[derive(Default)]
    struct RaisingHost {
        inner: HeadlessHost,
    }

    impl Host for RaisingHost {
        fn documents(&self) -> Vec<DocumentInfo> {
            self.inner.documents()
        }
        fn active_document(&self) -> Option<DocumentId> {
            self.inner.active_document()
        }
        fn new_document(&mut self, name: Option<&str>) -> Result<DocumentId, HostError> {
            self.inner.new_document(name)
        }
        fn set_label(&mut self, id: &DocumentId, label: &str) -> Result<(), HostError> {
            self.inner.set_label(id, label)
        }
        fn activate(&mut self, id: &DocumentId) -> Result<(), HostError> {
            self.inner.activate(id)
        }
        fn save_as(&mut self, id: &DocumentId, path: &Path) -> Result<(), HostError> {
            self.inner.save_as(id, path)
        }
        fn open(&mut self, path: &Path) -> Result<DocumentId, HostError> {
            self.inner.open(path)
        }
        fn run_script(&mut self, code: &str) -> Result<(), HostError> {
            if code.contains("raise") {
                return Err(HostError::Script(format!("RuntimeError in: {code}")));
            }
            self.inner.run_script(code)
        }
    }

    fn dispatcher<H: Host>(host: H, dir: &TempDir) -> (Dispatcher<H>, CommandQueue) {
        let queue = CommandQueue::new();
        let processor = PayloadProcessor::new(host, SessionSynchronizer::new(dir.path()));
        (
            Dispatcher::new(processor, queue.clone(), Duration::from_millis(10)),
            queue,
        )
    }

    fn executed_scripts(host: &HeadlessHost) -> Vec<String> {
        host.documents()
            .iter()
            .flat_map(|doc| host.scripts(&doc.id).unwrap_or_default().to_vec())
            .collect()
    }

    #[test]
    fn test_fenced_script_is_sanitized_and_executed() {
        let dir = TempDir::new().unwrap();
        let (mut dispatcher, queue) = dispatcher(HeadlessHost::new(), &dir);
        queue.enqueue(Payload::Script("```python\nprint(1)\n```".to_string()));

        let report = dispatcher.tick();

        assert_eq!(report.scripts_executed, 1);
        assert_eq!(report.failures(), 0);
        assert_eq!(executed_scripts(dispatcher.host()), vec!["print(1)".to_string()]);
    }

    #[test]
    fn test_script_creates_document_when_none_open() {
        let dir = TempDir::new().unwrap();
        let (mut dispatcher, queue) = dispatcher(HeadlessHost::new(), &dir);
        queue.enqueue(Payload::Script("x = 1".to_string()));

        dispatcher.tick();

        let docs = dispatcher.host().documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id.as_str(), "Untitled");
    }

    #[test]
    fn test_failing_script_does_not_stop_the_tick() {
        let dir = TempDir::new().unwrap();
        let (mut dispatcher, queue) = dispatcher(RaisingHost::default(), &dir);
        queue.enqueue(Payload::Script("raise RuntimeError('boom')".to_string()));
        queue.enqueue(Payload::Script("after = 2".to_string()));

        let report = dispatcher.tick();

        assert_eq!(report.drained, 2);
        assert_eq!(report.scripts_failed, 1);
        assert_eq!(report.scripts_executed, 1);
        assert_eq!(
            executed_scripts(&dispatcher.host().inner),
            vec!["after = 2".to_string()]
        );
    }

    #[test]
    fn test_payloads_processed_in_arrival_order() {
        let dir = TempDir::new().unwrap();
        let (mut dispatcher, queue) = dispatcher(HeadlessHost::new(), &dir);
        queue.enqueue(Payload::Script("first = 1".to_string()));
        queue.enqueue(Payload::Control(ControlCommand::sync_session(None, "s2")));
        queue.enqueue(Payload::Script("second = 2".to_string()));

        let report = dispatcher.tick();
        assert_eq!(report.scripts_executed, 2);
        assert_eq!(report.syncs_completed, 1);

        let host = dispatcher.host();
        let untitled = DocumentId::new("Untitled");
        assert_eq!(host.scripts(&untitled).unwrap().to_vec(), vec!["first = 1".to_string()]);
        let session_doc = host.find_by_label("Chat: s2").unwrap();
        assert_eq!(
            host.scripts(&session_doc.id).unwrap().to_vec(),
            vec!["second = 2".to_string()]
        );
    }

    #[test]
    fn test_failed_sync_is_counted_and_queue_continues() {
        let dir = TempDir::new().unwrap();
        let (mut dispatcher, queue) = dispatcher(HeadlessHost::new(), &dir);
        queue.enqueue(Payload::Control(ControlCommand::sync_session(None, "../bad")));
        queue.enqueue(Payload::Script("ok = 1".to_string()));

        let report = dispatcher.tick();
        assert_eq!(report.syncs_failed, 1);
        assert_eq!(report.scripts_executed, 1);
    }

    #[test]
    fn test_empty_script_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (mut dispatcher, queue) = dispatcher(HeadlessHost::new(), &dir);
        queue.enqueue(Payload::Script("```\n```".to_string()));

        let report = dispatcher.tick();
        assert_eq!(report.scripts_skipped, 1);
        assert!(dispatcher.host().documents().is_empty());
    }

    #[test]
    fn test_run_drains_before_returning() {
        let dir = TempDir::new().unwrap();
        let (mut dispatcher, queue) = dispatcher(HeadlessHost::new(), &dir);
        let token = CancellationToken::new();
        token.cancel();
        queue.enqueue(Payload::Script("late = 1".to_string()));

        dispatcher.run(&token);

        assert!(queue.is_empty());
        assert_eq!(executed_scripts(dispatcher.host()), vec!["late = 1".to_string()]);
    }

    #[test]
    fn test_direct_sink_executes_immediately() {
        let dir = TempDir::new().unwrap();
        let sink = DirectSink::new(PayloadProcessor::new(
            RaisingHost::default(),
            SessionSynchronizer::new(dir.path()),
        ));

        sink.submit(Payload::Script("y = 1".to_string())).unwrap();
        assert!(sink.submit(Payload::Script("raise".to_string())).is_err());

        let processor = sink.processor.into_inner().unwrap();
        assert_eq!(
            executed_scripts(&processor.host().inner),
            vec!["y = 1".to_string()]
        );
    }
}
