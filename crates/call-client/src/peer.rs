//! Media and peer-connection collaborators.
//!
//! The engine never touches media or transport itself. It drives a
//! [`PeerConnection`] through offer/answer and candidate exchange and
//! listens for [`PeerEvent`]s, and it borrows local media from a
//! [`MediaCapture`]. Descriptions and candidates are opaque strings.

use crate::errors::ClientError;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle to captured local media (e.g. camera and microphone tracks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle {
    label: String,
}

impl MediaHandle {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Local device capture.
#[async_trait::async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquire local media.
    async fn acquire(&self) -> Result<MediaHandle, ClientError>;

    /// Release media obtained from `acquire`.
    async fn release(&self, handle: MediaHandle);
}

/// Events emitted by a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A locally discovered reachability candidate, to be published.
    LocalCandidate(String),
    /// Inbound remote media became available.
    RemoteMedia,
}

/// A local peer-connection engine.
#[async_trait::async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach local media tracks.
    async fn add_local_media(&self, media: &MediaHandle) -> Result<(), ClientError>;

    /// Generate an offer description.
    async fn create_offer(&self) -> Result<String, ClientError>;

    /// Generate an answer for the applied remote offer.
    async fn create_answer(&self) -> Result<String, ClientError>;

    async fn set_local_description(&self, description: &str) -> Result<(), ClientError>;

    async fn set_remote_description(&self, description: &str) -> Result<(), ClientError>;

    /// Apply a remote reachability candidate.
    async fn add_remote_candidate(&self, candidate: &str) -> Result<(), ClientError>;

    /// Tear down the connection. Must tolerate repeated calls.
    async fn close(&self);
}

/// Constructs peer connections.
#[async_trait::async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Create a peer connection using `ice_servers`, together with its event stream.
    async fn create(
        &self,
        ice_servers: &[String],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::Receiver<PeerEvent>), ClientError>;
}

/// Scriptable fakes for engine tests.
///
/// `FakePeerConnection` records everything applied to it. Setting the local
/// description emits the configured local candidates; the first remote
/// candidate applied after both descriptions emits `RemoteMedia`.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Event channel capacity for fake connections.
    const EVENT_CAPACITY: usize = 64;

    #[derive(Debug, Default)]
    struct FakePeerState {
        ice_servers: Vec<String>,
        local_media: Vec<MediaHandle>,
        local_description: Option<String>,
        remote_descriptions: Vec<String>,
        remote_candidates: Vec<String>,
        candidate_attempts: usize,
        remote_media_sent: bool,
    }

    /// Recording peer connection.
    pub struct FakePeerConnection {
        label: String,
        events: mpsc::Sender<PeerEvent>,
        local_candidates: Vec<String>,
        rejected_candidates: Vec<String>,
        generated: AtomicUsize,
        failing_remote_descriptions: AtomicUsize,
        closes: AtomicUsize,
        closed: AtomicBool,
        state: Mutex<FakePeerState>,
    }

    impl FakePeerConnection {
        /// Create a fake that emits `local_candidates` once its local
        /// description is set.
        pub fn new(
            label: &str,
            local_candidates: Vec<String>,
        ) -> (Arc<Self>, mpsc::Receiver<PeerEvent>) {
            Self::with_rejections(label, local_candidates, Vec::new())
        }

        /// Like `new`, but `add_remote_candidate` fails for `rejected`.
        pub fn with_rejections(
            label: &str,
            local_candidates: Vec<String>,
            rejected: Vec<String>,
        ) -> (Arc<Self>, mpsc::Receiver<PeerEvent>) {
            let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
            let peer = Arc::new(Self {
                label: label.to_string(),
                events: tx,
                local_candidates,
                rejected_candidates: rejected,
                generated: AtomicUsize::new(0),
                failing_remote_descriptions: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                state: Mutex::new(FakePeerState::default()),
            });
            (peer, rx)
        }

        /// Reject the next `count` `set_remote_description` calls.
        pub fn fail_next_remote_descriptions(&self, count: usize) {
            self.failing_remote_descriptions
                .store(count, Ordering::SeqCst);
        }

        pub async fn ice_servers(&self) -> Vec<String> {
            self.state.lock().await.ice_servers.clone()
        }

        pub async fn local_media(&self) -> Vec<MediaHandle> {
            self.state.lock().await.local_media.clone()
        }

        pub async fn local_description(&self) -> Option<String> {
            self.state.lock().await.local_description.clone()
        }

        /// Every remote description applied, in order.
        pub async fn remote_descriptions(&self) -> Vec<String> {
            self.state.lock().await.remote_descriptions.clone()
        }

        /// Remote candidates accepted, in order.
        pub async fn remote_candidates(&self) -> Vec<String> {
            self.state.lock().await.remote_candidates.clone()
        }

        /// Number of `add_remote_candidate` calls, accepted or not.
        pub async fn candidate_attempts(&self) -> usize {
            self.state.lock().await.candidate_attempts
        }

        /// Number of `close` calls.
        pub fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn ensure_open(&self) -> Result<(), ClientError> {
            if self.is_closed() {
                return Err(ClientError::PeerConnection("connection closed".to_string()));
            }
            Ok(())
        }

        fn next_description(&self, kind: &str) -> String {
            let n = self.generated.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{}-{}-{}", kind, self.label, n)
        }
    }

    #[async_trait::async_trait]
    impl PeerConnection for FakePeerConnection {
        async fn add_local_media(&self, media: &MediaHandle) -> Result<(), ClientError> {
            self.ensure_open()?;
            self.state.lock().await.local_media.push(media.clone());
            Ok(())
        }

        async fn create_offer(&self) -> Result<String, ClientError> {
            self.ensure_open()?;
            Ok(self.next_description("offer"))
        }

        async fn create_answer(&self) -> Result<String, ClientError> {
            self.ensure_open()?;
            if self.state.lock().await.remote_descriptions.is_empty() {
                return Err(ClientError::PeerConnection(
                    "no remote offer applied".to_string(),
                ));
            }
            Ok(self.next_description("answer"))
        }

        async fn set_local_description(&self, description: &str) -> Result<(), ClientError> {
            self.ensure_open()?;
            let first = {
                let mut state = self.state.lock().await;
                let first = state.local_description.is_none();
                state.local_description = Some(description.to_string());
                first
            };
            if first {
                for candidate in &self.local_candidates {
                    let _ = self
                        .events
                        .try_send(PeerEvent::LocalCandidate(candidate.clone()));
                }
            }
            Ok(())
        }

        async fn set_remote_description(&self, description: &str) -> Result<(), ClientError> {
            self.ensure_open()?;
            let reject = self
                .failing_remote_descriptions
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if reject {
                return Err(ClientError::PeerConnection(
                    "remote description rejected".to_string(),
                ));
            }
            self.state
                .lock()
                .await
                .remote_descriptions
                .push(description.to_string());
            Ok(())
        }

        async fn add_remote_candidate(&self, candidate: &str) -> Result<(), ClientError> {
            self.ensure_open()?;
            let mut state = self.state.lock().await;
            state.candidate_attempts += 1;
            if self.rejected_candidates.iter().any(|c| c == candidate) {
                return Err(ClientError::PeerConnection(format!(
                    "candidate rejected: {}",
                    candidate
                )));
            }
            state.remote_candidates.push(candidate.to_string());

            let negotiated =
                state.local_description.is_some() && !state.remote_descriptions.is_empty();
            if negotiated && !state.remote_media_sent {
                state.remote_media_sent = true;
                let _ = self.events.try_send(PeerEvent::RemoteMedia);
            }
            Ok(())
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Factory handing out `FakePeerConnection`s and keeping them for inspection.
    pub struct FakePeerFactory {
        label: String,
        local_candidates: Vec<String>,
        fail: bool,
        created: Mutex<Vec<Arc<FakePeerConnection>>>,
    }

    impl FakePeerFactory {
        pub fn new(label: &str, local_candidates: Vec<String>) -> Self {
            Self {
                label: label.to_string(),
                local_candidates,
                fail: false,
                created: Mutex::new(Vec::new()),
            }
        }

        /// A factory whose `create` always fails.
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new("failing", Vec::new())
            }
        }

        /// The most recently created connection.
        pub async fn last(&self) -> Option<Arc<FakePeerConnection>> {
            self.created.lock().await.last().cloned()
        }
    }

    #[async_trait::async_trait]
    impl PeerConnectionFactory for FakePeerFactory {
        async fn create(
            &self,
            ice_servers: &[String],
        ) -> Result<(Arc<dyn PeerConnection>, mpsc::Receiver<PeerEvent>), ClientError> {
            if self.fail {
                return Err(ClientError::PeerConnection(
                    "peer connection unavailable".to_string(),
                ));
            }
            let (peer, events) = FakePeerConnection::new(&self.label, self.local_candidates.clone());
            peer.state.lock().await.ice_servers = ice_servers.to_vec();
            self.created.lock().await.push(Arc::clone(&peer));
            let peer: Arc<dyn PeerConnection> = peer;
            Ok((peer, events))
        }
    }

    /// Media capture counting acquisitions and releases.
    pub struct FakeMediaCapture {
        fail: bool,
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl FakeMediaCapture {
        pub fn new() -> Self {
            Self {
                fail: false,
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }
        }

        /// A capture whose `acquire` always fails (e.g. permission denied).
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        pub fn acquired(&self) -> usize {
            self.acquired.load(Ordering::SeqCst)
        }

        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    impl Default for FakeMediaCapture {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait::async_trait]
    impl MediaCapture for FakeMediaCapture {
        async fn acquire(&self) -> Result<MediaHandle, ClientError> {
            if self.fail {
                return Err(ClientError::Media("permission denied".to_string()));
            }
            let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(MediaHandle::new(format!("media-{}", n)))
        }

        async fn release(&self, _handle: MediaHandle) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}
