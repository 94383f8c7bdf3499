//! In-process fan-out sink
//!
//! Reference implementation of [`AttachmentPoint`]: the multifdsink-style
//! element that fans a live chunk stream out to every attached client socket.
//!
//! Each sink gets one bounded queue of chunks, capacity equal to the
//! channel's `buffers-max`. A dedicated writer task drains the queue into the
//! client's write half. `Bytes` payloads are reference counted, so fanning a
//! chunk out to N sinks clones a pointer, not the data.
//!
//! A sink whose queue is full when a new chunk arrives is evicted: it gets an
//! `AboutToRemove(Slow)` warning and a cancel signal that interrupts the
//! writer task even mid-write, so the sink reports `Removed` whether or not
//! the client is still holding the connection open. A write error (the client
//! went away) takes the same `Removed` exit without the warning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Notify, RwLock};

use crate::channel::ChannelDescriptor;

use super::{AttachmentError, AttachmentPoint, RemoveReason, SinkEvent, SinkId, SinkWriter};

/// Capacity of the lifecycle event stream
///
/// Bounds the records pending dispatch across all sinks at once; a lagging
/// subscriber past this point loses removal records, so it is sized to
/// outlast a burst of simultaneous detaches (e.g. channel teardown with
/// hundreds of consumers).
const EVENT_STREAM_CAPACITY: usize = 1024;

/// Shared fan-out element for one channel
pub struct FanoutSink {
    inner: Arc<Inner>,
}

/// Queue handle and cancel signal for one attached sink
struct SinkHandle {
    tx: mpsc::Sender<Bytes>,
    cancel: Arc<Notify>,
}

struct Inner {
    /// Element name, `fd-<channel>`
    name: String,
    /// Per-sink queue capacity in chunks
    buffers_max: usize,
    /// Attached sinks
    sinks: RwLock<HashMap<SinkId, SinkHandle>>,
    /// Multiplexed lifecycle event stream
    events: broadcast::Sender<SinkEvent>,
    /// Set once the element is shut down; new attachments are refused
    closed: AtomicBool,
}

impl Inner {
    /// Remove a sink's handle. Returns false if it was already gone.
    async fn remove(&self, id: SinkId) -> bool {
        self.sinks.write().await.remove(&id).is_some()
    }
}

impl FanoutSink {
    /// Create the fan-out element for a channel
    pub fn new(descriptor: &ChannelDescriptor) -> Self {
        let (events, _) = broadcast::channel(EVENT_STREAM_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                name: descriptor.attachment_key(),
                buffers_max: descriptor.buffers_max().max(1),
                sinks: RwLock::new(HashMap::new()),
                events,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Element name (`fd-<channel>`)
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of currently attached sinks
    pub async fn attached(&self) -> usize {
        self.inner.sinks.read().await.len()
    }

    /// Whether a sink is currently attached
    pub async fn is_attached(&self, id: SinkId) -> bool {
        self.inner.sinks.read().await.contains_key(&id)
    }

    /// Fan one chunk out to every attached sink
    ///
    /// Sinks whose queue is full are evicted as slow consumers. Never blocks
    /// on any individual client.
    pub async fn feed(&self, chunk: Bytes) {
        let stalled: Vec<SinkId> = {
            let sinks = self.inner.sinks.read().await;
            let mut stalled = Vec::new();

            for (id, handle) in sinks.iter() {
                match handle.tx.try_send(chunk.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => stalled.push(*id),
                    // Writer task is exiting and cleans up after itself
                    Err(TrySendError::Closed(_)) => {}
                }
            }

            stalled
        };

        for id in stalled {
            self.evict_slow(id).await;
        }
    }

    /// Detach every sink (channel teardown)
    ///
    /// Each writer task stops immediately and reports `Removed`; chunks still
    /// queued for a sink are discarded.
    pub async fn detach_all(&self) {
        let handles: Vec<SinkHandle> = {
            let mut sinks = self.inner.sinks.write().await;
            sinks.drain().map(|(_, handle)| handle).collect()
        };

        if handles.is_empty() {
            return;
        }

        tracing::debug!(
            element = %self.inner.name,
            sinks = handles.len(),
            "Detaching all sinks"
        );

        for handle in &handles {
            handle.cancel.notify_one();
        }
    }

    /// Shut the element down: refuse new attachments and detach all sinks
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.detach_all().await;
    }

    async fn evict_slow(&self, id: SinkId) {
        let handle = self.inner.sinks.write().await.remove(&id);

        if let Some(handle) = handle {
            tracing::warn!(
                element = %self.inner.name,
                sink = %id,
                "Sink queue full, evicting slow consumer"
            );

            // Warning first, then the cancel signal: the writer task only
            // reports `Removed` once it observes the cancel, so the early
            // warning always precedes the removal on the event stream.
            let _ = self
                .inner
                .events
                .send(SinkEvent::about_to_remove(id, RemoveReason::Slow));
            handle.cancel.notify_one();
        }
    }
}

impl AttachmentPoint for FanoutSink {
    fn add_sink(
        &self,
        id: SinkId,
        writer: SinkWriter,
    ) -> impl std::future::Future<Output = Result<(), AttachmentError>> + Send {
        async move {
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(AttachmentError::SinkUnavailable(self.inner.name.clone()));
            }

            let (tx, rx) = mpsc::channel(self.inner.buffers_max);
            let cancel = Arc::new(Notify::new());

            {
                let mut sinks = self.inner.sinks.write().await;
                if sinks.contains_key(&id) {
                    return Err(AttachmentError::AlreadyAttached(id));
                }
                sinks.insert(
                    id,
                    SinkHandle {
                        tx,
                        cancel: Arc::clone(&cancel),
                    },
                );
            }

            tracing::debug!(element = %self.inner.name, sink = %id, "Sink attached");

            let inner = Arc::clone(&self.inner);
            tokio::spawn(run_writer(inner, id, writer, rx, cancel));

            Ok(())
        }
    }

    fn events(&self) -> broadcast::Receiver<SinkEvent> {
        self.inner.events.subscribe()
    }
}

/// Drain one sink's queue into its socket until cancelled, cut off, or hit by
/// a write failure, then report `Removed` exactly once
///
/// The cancel signal interrupts an in-flight write; a stalled client cannot
/// keep the task pinned inside `write_all`.
async fn run_writer(
    inner: Arc<Inner>,
    id: SinkId,
    mut writer: SinkWriter,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: Arc<Notify>,
) {
    loop {
        let chunk = tokio::select! {
            _ = cancel.notified() => break,
            chunk = rx.recv() => match chunk {
                Some(chunk) => chunk,
                // Queue cut off by teardown
                None => break,
            },
        };

        let write = tokio::select! {
            _ = cancel.notified() => break,
            result = writer.write_all(&chunk) => result,
        };

        if let Err(e) = write {
            tracing::debug!(
                element = %inner.name,
                sink = %id,
                error = %e,
                "Sink write failed, detaching"
            );
            inner.remove(id).await;
            break;
        }
    }

    let _ = inner.events.send(SinkEvent::removed(id));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    use crate::channel::ChannelKind;
    use crate::graph::SinkEventKind;

    use super::*;

    fn descriptor(buffers_max: usize) -> ChannelDescriptor {
        ChannelDescriptor::new("test", ChannelKind::VideoOnly, buffers_max)
    }

    async fn next_event(rx: &mut broadcast::Receiver<SinkEvent>) -> SinkEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for sink event")
            .expect("event stream closed or lagged")
    }

    #[tokio::test]
    async fn test_attached_sink_receives_chunks() {
        let sink = FanoutSink::new(&descriptor(16));
        let (client, server) = tokio::io::duplex(1024);
        let id = SinkId::new(1);

        assert_ok!(sink.add_sink(id, Box::new(server)).await);
        assert!(sink.is_attached(id).await);

        sink.feed(Bytes::from_static(b"hello ")).await;
        sink.feed(Bytes::from_static(b"world")).await;

        let mut client = client;
        let mut buf = [0u8; 11];
        timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out reading")
            .expect("read failed");

        assert_eq!(&buf, b"hello world");
    }

    #[tokio::test]
    async fn test_duplicate_attach_rejected() {
        let sink = FanoutSink::new(&descriptor(16));
        let id = SinkId::new(1);

        let (_c1, s1) = tokio::io::duplex(64);
        let (_c2, s2) = tokio::io::duplex(64);

        sink.add_sink(id, Box::new(s1)).await.unwrap();
        let result = sink.add_sink(id, Box::new(s2)).await;

        assert!(matches!(result, Err(AttachmentError::AlreadyAttached(_))));
        assert_eq!(sink.attached().await, 1);
    }

    #[tokio::test]
    async fn test_client_disconnect_reports_removed() {
        let sink = FanoutSink::new(&descriptor(16));
        let mut events = sink.events();
        let id = SinkId::new(2);

        let (client, server) = tokio::io::duplex(64);
        sink.add_sink(id, Box::new(server)).await.unwrap();

        // Client goes away; the next writes fail
        drop(client);
        sink.feed(Bytes::from_static(b"data")).await;

        let event = next_event(&mut events).await;
        assert_eq!(event, SinkEvent::removed(id));
        assert!(!sink.is_attached(id).await);
    }

    #[tokio::test]
    async fn test_slow_sink_evicted_with_warning_then_removed() {
        // Queue of one chunk; the duplex buffer is too small for a chunk, so
        // the writer task stalls mid-write and the queue backs up. The client
        // end stays open the whole time: eviction alone must complete the
        // removal, with no help from a disconnect.
        let sink = FanoutSink::new(&descriptor(1));
        let mut events = sink.events();
        let id = SinkId::new(3);

        let (client, server) = tokio::io::duplex(8);
        sink.add_sink(id, Box::new(server)).await.unwrap();

        let chunk = Bytes::from(vec![0u8; 64]);
        for _ in 0..4 {
            sink.feed(chunk.clone()).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let warning = next_event(&mut events).await;
        assert_eq!(
            warning,
            SinkEvent::about_to_remove(id, RemoveReason::Slow)
        );

        let removed = next_event(&mut events).await;
        assert_eq!(removed, SinkEvent::removed(id));
        assert!(!sink.is_attached(id).await);

        // Only now does the stalled client let go
        drop(client);
    }

    #[tokio::test]
    async fn test_slow_eviction_leaves_other_sinks_attached() {
        let sink = FanoutSink::new(&descriptor(1));
        let id_slow = SinkId::new(4);
        let id_ok = SinkId::new(5);

        let (_stuck_client, slow_server) = tokio::io::duplex(8);
        let (mut ok_client, ok_server) = tokio::io::duplex(4096);

        sink.add_sink(id_slow, Box::new(slow_server)).await.unwrap();
        sink.add_sink(id_ok, Box::new(ok_server)).await.unwrap();

        let chunk = Bytes::from(vec![1u8; 64]);
        for _ in 0..4 {
            sink.feed(chunk.clone()).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!sink.is_attached(id_slow).await);
        assert!(sink.is_attached(id_ok).await);

        // The healthy sink got every chunk
        let mut buf = vec![0u8; 64 * 4];
        timeout(Duration::from_secs(2), ok_client.read_exact(&mut buf))
            .await
            .expect("timed out reading")
            .expect("read failed");
    }

    #[tokio::test]
    async fn test_detach_all_reports_removed_for_each_sink() {
        let sink = FanoutSink::new(&descriptor(16));
        let mut events = sink.events();

        let (_c1, s1) = tokio::io::duplex(64);
        let (_c2, s2) = tokio::io::duplex(64);
        sink.add_sink(SinkId::new(6), Box::new(s1)).await.unwrap();
        sink.add_sink(SinkId::new(7), Box::new(s2)).await.unwrap();

        sink.detach_all().await;
        assert_eq!(sink.attached().await, 0);

        let mut removed = vec![next_event(&mut events).await, next_event(&mut events).await];
        removed.sort_by_key(|e| e.id);
        assert_eq!(removed[0], SinkEvent::removed(SinkId::new(6)));
        assert_eq!(removed[1], SinkEvent::removed(SinkId::new(7)));
    }

    #[tokio::test]
    async fn test_event_stream_buffers_removal_bursts() {
        // Teardown of many sinks at once must not lose removal records even
        // when the subscriber only starts draining afterwards.
        let sink = FanoutSink::new(&descriptor(4));
        let mut events = sink.events();

        let count: u64 = 100;
        let mut clients = Vec::new();
        for i in 0..count {
            let (client, server) = tokio::io::duplex(64);
            clients.push(client);
            sink.add_sink(SinkId::new(i), Box::new(server)).await.unwrap();
        }

        sink.detach_all().await;

        let mut removed = 0;
        while removed < count {
            let event = next_event(&mut events).await;
            assert_eq!(event.kind, SinkEventKind::Removed);
            removed += 1;
        }
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_sinks() {
        let sink = FanoutSink::new(&descriptor(16));
        sink.shutdown().await;

        let (_client, server) = tokio::io::duplex(64);
        let result = sink.add_sink(SinkId::new(8), Box::new(server)).await;

        assert!(matches!(result, Err(AttachmentError::SinkUnavailable(_))));
    }
}
