//! Client negotiation engine.
//!
//! Drives one side of a call from setup to termination:
//!
//! ```text
//! Initiating/Joining -> Negotiating -> Connected -> Ended
//! ```
//!
//! After setup two tasks run per call, sharing one [`CancellationToken`]:
//!
//! - the poller reads the session every `poll_interval` and feeds it to the
//!   [`Reconciler`]; `NotFound` is the remote termination signal
//! - the forwarder drains the peer connection's events, publishing local
//!   candidates as they are discovered
//!
//! Writes are pushed, reads are polled. Termination (local `end()` or remote
//! `NotFound`) runs exactly once: it cancels both tasks, closes the peer
//! connection, releases local media and publishes [`CallState::Ended`].

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::peer::{MediaCapture, MediaHandle, PeerConnection, PeerConnectionFactory, PeerEvent};
use crate::reconciler::Reconciler;
use crate::rpc::{CallApi, HttpCallClient};
use common::types::{CallId, CallSession, Slot};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// This side ended the call.
    Local,
    /// The call disappeared from the call service.
    Remote,
}

/// Observable state of a call on this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Initiating,
    Joining,
    /// Descriptions are being exchanged.
    Negotiating,
    /// The remote description is applied (initiator) or remote media arrived.
    Connected,
    Ended(EndReason),
}

impl CallState {
    pub fn is_ended(&self) -> bool {
        matches!(self, CallState::Ended(_))
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Initiating => write!(f, "initiating"),
            CallState::Joining => write!(f, "joining"),
            CallState::Negotiating => write!(f, "negotiating"),
            CallState::Connected => write!(f, "connected"),
            CallState::Ended(EndReason::Local) => write!(f, "ended (local)"),
            CallState::Ended(EndReason::Remote) => write!(f, "ended (remote)"),
        }
    }
}

/// Factory for calls on behalf of one participant.
#[derive(Clone)]
pub struct CallEngine {
    api: Arc<dyn CallApi>,
    media: Arc<dyn MediaCapture>,
    peers: Arc<dyn PeerConnectionFactory>,
    poll_interval: Duration,
    ice_servers: Vec<String>,
}

impl CallEngine {
    pub fn new(
        api: Arc<dyn CallApi>,
        media: Arc<dyn MediaCapture>,
        peers: Arc<dyn PeerConnectionFactory>,
        poll_interval: Duration,
        ice_servers: Vec<String>,
    ) -> Self {
        Self {
            api,
            media,
            peers,
            poll_interval,
            ice_servers,
        }
    }

    /// Build an engine talking HTTP to the configured call service.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the HTTP client cannot be built.
    pub fn from_config(
        config: &ClientConfig,
        media: Arc<dyn MediaCapture>,
        peers: Arc<dyn PeerConnectionFactory>,
    ) -> Result<Self, ClientError> {
        let api = Arc::new(HttpCallClient::from_config(config)?);
        Ok(Self::new(
            api,
            media,
            peers,
            config.poll_interval,
            config.ice_servers.clone(),
        ))
    }

    /// Create a call, publish an offer and start waiting for an answer.
    ///
    /// # Errors
    ///
    /// Any failure of `initializeCall`, media capture, the peer connection or
    /// `sendOffer`. If the call was already created, it is ended best-effort
    /// and local resources are released before returning.
    #[instrument(skip_all, name = "cc.engine.start_call")]
    pub async fn start_call(&self) -> Result<ActiveCall, ClientError> {
        let (state_tx, _) = watch::channel(CallState::Initiating);

        let call_id = self.api.initialize_call().await?;
        info!(target: "cc.engine", call_id = %call_id, "Call initialized");

        let mut setup = Setup::new(self, call_id);
        match setup.initiate().await {
            Ok(events) => Ok(self.launch(setup, Reconciler::new(Slot::Initiator), events, state_tx)),
            Err(e) => {
                warn!(target: "cc.engine", call_id = %call_id, error = %e, "Call setup failed");
                setup.abandon().await;
                Err(e)
            }
        }
    }

    /// Join `call_id` as the second participant.
    ///
    /// If the join snapshot already carries an offer it is answered right
    /// away; otherwise the answer follows once polling sees the offer.
    ///
    /// # Errors
    ///
    /// - `ClientError::CallFull` - the call already has two participants
    /// - `ClientError::NotFound` - no such call
    /// - any media or peer connection failure; the call is then ended
    ///   best-effort and local resources are released
    #[instrument(skip_all, name = "cc.engine.join_call", fields(call_id = %call_id))]
    pub async fn join_call(&self, call_id: CallId) -> Result<ActiveCall, ClientError> {
        let (state_tx, _) = watch::channel(CallState::Joining);

        let snapshot = self.api.join_call(call_id).await.inspect_err(|e| {
            warn!(target: "cc.engine", call_id = %call_id, error = %e, "Join rejected");
        })?;
        info!(target: "cc.engine", call_id = %call_id, "Joined call");

        let mut setup = Setup::new(self, call_id);
        let mut reconciler = Reconciler::new(Slot::Joiner);
        match setup.join(&snapshot, &mut reconciler).await {
            Ok(events) => Ok(self.launch(setup, reconciler, events, state_tx)),
            Err(e) => {
                warn!(target: "cc.engine", call_id = %call_id, error = %e, "Call setup failed");
                setup.abandon().await;
                Err(e)
            }
        }
    }

    fn launch(
        &self,
        setup: Setup,
        reconciler: Reconciler,
        events: mpsc::Receiver<PeerEvent>,
        state_tx: watch::Sender<CallState>,
    ) -> ActiveCall {
        let Setup {
            call_id,
            api,
            media,
            peer,
            media_handle,
            ..
        } = setup;

        state_tx.send_replace(CallState::Negotiating);

        let ctx = Arc::new(CallContext {
            call_id,
            role: reconciler.role(),
            api,
            media,
            peer,
            media_handle: Mutex::new(media_handle),
            cancel: CancellationToken::new(),
            terminated: AtomicBool::new(false),
            state: state_tx,
        });

        let poller = tokio::spawn(run_poller(Arc::clone(&ctx), reconciler, self.poll_interval));
        let forwarder = tokio::spawn(run_forwarder(Arc::clone(&ctx), events));

        info!(
            target: "cc.engine",
            call_id = %call_id,
            slot = %ctx.role,
            "Negotiating"
        );

        ActiveCall {
            ctx,
            poller,
            forwarder,
        }
    }
}

/// Resources acquired during setup, released by `abandon` on failure.
struct Setup {
    call_id: CallId,
    api: Arc<dyn CallApi>,
    media: Arc<dyn MediaCapture>,
    peers: Arc<dyn PeerConnectionFactory>,
    ice_servers: Vec<String>,
    media_handle: Option<MediaHandle>,
    peer: Option<Arc<dyn PeerConnection>>,
}

impl Setup {
    fn new(engine: &CallEngine, call_id: CallId) -> Self {
        Self {
            call_id,
            api: Arc::clone(&engine.api),
            media: Arc::clone(&engine.media),
            peers: Arc::clone(&engine.peers),
            ice_servers: engine.ice_servers.clone(),
            media_handle: None,
            peer: None,
        }
    }

    /// Acquire media and build a peer connection with media attached.
    async fn prepare(&mut self) -> Result<(Arc<dyn PeerConnection>, mpsc::Receiver<PeerEvent>), ClientError> {
        let handle = self.media.acquire().await?;
        self.media_handle = Some(handle.clone());

        let (peer, events) = self.peers.create(&self.ice_servers).await?;
        self.peer = Some(Arc::clone(&peer));

        peer.add_local_media(&handle).await?;
        Ok((peer, events))
    }

    async fn initiate(&mut self) -> Result<mpsc::Receiver<PeerEvent>, ClientError> {
        let (peer, events) = self.prepare().await?;

        let offer = peer.create_offer().await?;
        peer.set_local_description(&offer).await?;
        self.api.send_offer(self.call_id, &offer).await?;

        debug!(
            target: "cc.engine",
            call_id = %self.call_id,
            offer_len = offer.len(),
            "Offer published"
        );
        Ok(events)
    }

    async fn join(
        &mut self,
        snapshot: &CallSession,
        reconciler: &mut Reconciler,
    ) -> Result<mpsc::Receiver<PeerEvent>, ClientError> {
        if snapshot.participant(Slot::Joiner).is_none() {
            return Err(ClientError::InvalidState(
                "Join snapshot does not list a joiner".to_string(),
            ));
        }

        let (peer, events) = self.prepare().await?;

        reconciler.reconcile(snapshot, peer.as_ref()).await?;
        if let Some(answer) = reconciler.pending_answer() {
            match self.api.send_answer(self.call_id, answer).await {
                Ok(()) => reconciler.answer_published(),
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) => {
                    // Stays pending; the poller retries it.
                    warn!(target: "cc.engine", call_id = %self.call_id, error = %e, "Answer not published");
                }
            }
        } else {
            debug!(target: "cc.engine", call_id = %self.call_id, "No offer yet, waiting");
        }

        Ok(events)
    }

    /// Best-effort teardown after a setup failure.
    async fn abandon(self) {
        if let Some(peer) = &self.peer {
            peer.close().await;
        }
        if let Some(handle) = self.media_handle {
            self.media.release(handle).await;
        }
        if let Err(e) = self.api.end_call(self.call_id).await {
            debug!(target: "cc.engine", call_id = %self.call_id, error = %e, "Cleanup end_call failed");
        }
    }
}

/// State shared by an [`ActiveCall`] and its background tasks.
struct CallContext {
    call_id: CallId,
    role: Slot,
    api: Arc<dyn CallApi>,
    media: Arc<dyn MediaCapture>,
    peer: Option<Arc<dyn PeerConnection>>,
    media_handle: Mutex<Option<MediaHandle>>,
    cancel: CancellationToken,
    terminated: AtomicBool,
    state: watch::Sender<CallState>,
}

impl CallContext {
    fn peer(&self) -> Result<&dyn PeerConnection, ClientError> {
        self.peer
            .as_deref()
            .ok_or_else(|| ClientError::InvalidState("No peer connection".to_string()))
    }

    /// Move `Negotiating` to `Connected`; any other state is left alone.
    fn mark_connected(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == CallState::Negotiating {
                *state = CallState::Connected;
                true
            } else {
                false
            }
        });
        if changed {
            info!(target: "cc.engine", call_id = %self.call_id, slot = %self.role, "Connected");
        }
    }

    /// Tear the call down. Only the first caller does any work.
    async fn terminate(&self, reason: EndReason) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.cancel.cancel();
        if let Some(peer) = &self.peer {
            peer.close().await;
        }
        if let Some(handle) = self.media_handle.lock().await.take() {
            self.media.release(handle).await;
        }
        self.state.send_replace(CallState::Ended(reason));

        info!(
            target: "cc.engine",
            call_id = %self.call_id,
            slot = %self.role,
            reason = ?reason,
            "Call ended"
        );
        true
    }
}

/// Whether the poller keeps going after a tick.
enum PollStatus {
    Continue,
    Stop,
}

/// Poll the session until the call ends or the token is cancelled.
async fn run_poller(ctx: Arc<CallContext>, mut reconciler: Reconciler, poll_interval: Duration) {
    debug!(
        target: "cc.poller",
        call_id = %ctx.call_id,
        interval_ms = poll_interval.as_millis() as u64,
        "Starting poller"
    );

    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let PollStatus::Stop = poll_once(&ctx, &mut reconciler).await {
                    break;
                }
            }
            _ = ctx.cancel.cancelled() => {
                break;
            }
        }
    }

    debug!(target: "cc.poller", call_id = %ctx.call_id, "Poller stopped");
}

async fn poll_once(ctx: &CallContext, reconciler: &mut Reconciler) -> PollStatus {
    let session = match ctx.api.get_call_session(ctx.call_id).await {
        Ok(session) => session,
        Err(e) if e.is_not_found() => {
            info!(target: "cc.poller", call_id = %ctx.call_id, "Call no longer exists");
            ctx.terminate(EndReason::Remote).await;
            return PollStatus::Stop;
        }
        Err(e) => {
            warn!(target: "cc.poller", call_id = %ctx.call_id, error = %e, "Poll failed");
            return PollStatus::Continue;
        }
    };

    if ctx.cancel.is_cancelled() {
        return PollStatus::Stop;
    }

    let peer = match ctx.peer() {
        Ok(peer) => peer,
        Err(e) => {
            warn!(target: "cc.poller", call_id = %ctx.call_id, error = %e, "Cannot reconcile");
            return PollStatus::Stop;
        }
    };

    match reconciler.reconcile(&session, peer).await {
        Ok(outcome) => {
            if outcome.description_applied && ctx.role == Slot::Initiator {
                ctx.mark_connected();
            }
        }
        Err(e) => {
            warn!(target: "cc.poller", call_id = %ctx.call_id, error = %e, "Reconcile failed");
        }
    }

    if let Some(answer) = reconciler.pending_answer() {
        match ctx.api.send_answer(ctx.call_id, answer).await {
            Ok(()) => {
                reconciler.answer_published();
                debug!(target: "cc.poller", call_id = %ctx.call_id, "Answer published");
            }
            Err(e) if e.is_not_found() => {
                ctx.terminate(EndReason::Remote).await;
                return PollStatus::Stop;
            }
            Err(e) => {
                warn!(target: "cc.poller", call_id = %ctx.call_id, error = %e, "Answer not published, will retry");
            }
        }
    }

    PollStatus::Continue
}

/// Publish local candidates and watch for remote media.
async fn run_forwarder(ctx: Arc<CallContext>, mut events: mpsc::Receiver<PeerEvent>) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PeerEvent::LocalCandidate(candidate)) => {
                    // A stale candidate for a dead call is not actionable.
                    if let Err(e) = ctx.api.add_ice_candidate(ctx.call_id, &candidate).await {
                        debug!(
                            target: "cc.forwarder",
                            call_id = %ctx.call_id,
                            error = %e,
                            "Dropped local candidate"
                        );
                    }
                }
                Some(PeerEvent::RemoteMedia) => ctx.mark_connected(),
                None => break,
            },
            _ = ctx.cancel.cancelled() => break,
        }
    }

    debug!(target: "cc.forwarder", call_id = %ctx.call_id, "Forwarder stopped");
}

/// Handle to a live call.
///
/// Dropping the handle stops the background tasks without releasing
/// resources; call [`ActiveCall::end`] for an orderly shutdown.
pub struct ActiveCall {
    ctx: Arc<CallContext>,
    poller: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl ActiveCall {
    pub fn call_id(&self) -> CallId {
        self.ctx.call_id
    }

    pub fn role(&self) -> Slot {
        self.ctx.role
    }

    /// Current state.
    pub fn state(&self) -> CallState {
        *self.ctx.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.ctx.state.subscribe()
    }

    /// Wait until the call ends and return why.
    pub async fn ended(&self) -> EndReason {
        let mut rx = self.ctx.state.subscribe();
        let state = match rx.wait_for(CallState::is_ended).await {
            Ok(state) => *state,
            // The sender lives in ctx, which we hold.
            Err(_) => CallState::Ended(EndReason::Local),
        };
        match state {
            CallState::Ended(reason) => reason,
            _ => EndReason::Local,
        }
    }

    /// End the call.
    ///
    /// Local teardown always happens, whether or not the call service
    /// accepts the request. `NotFound` (the other side ended first) and
    /// repeated calls are not errors.
    ///
    /// # Errors
    ///
    /// Any other failure of `endCall`, after local teardown.
    #[instrument(skip_all, name = "cc.engine.end", fields(call_id = %self.ctx.call_id))]
    pub async fn end(&self) -> Result<(), ClientError> {
        if self.ctx.terminated.load(Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.ctx.api.end_call(self.ctx.call_id).await;
        self.ctx.terminate(EndReason::Local).await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => {
                warn!(target: "cc.engine", call_id = %self.ctx.call_id, error = %e, "end_call failed");
                Err(e)
            }
        }
    }
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        self.ctx.cancel.cancel();
        self.poller.abort();
        self.forwarder.abort();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::peer::mock::{FakeMediaCapture, FakePeerFactory};
    use crate::rpc::MockCallApi;
    use common::types::ParticipantId;
    use std::future::Future;

    const POLL: Duration = Duration::from_millis(10);

    fn pid(raw: &str) -> ParticipantId {
        ParticipantId::parse(raw).unwrap()
    }

    struct Harness {
        api: Arc<MockCallApi>,
        media: Arc<FakeMediaCapture>,
        peers: Arc<FakePeerFactory>,
        engine: CallEngine,
    }

    fn harness(api: MockCallApi, media: FakeMediaCapture, peers: FakePeerFactory) -> Harness {
        let api = Arc::new(api);
        let media = Arc::new(media);
        let peers = Arc::new(peers);
        let engine = CallEngine::new(
            api.clone(),
            media.clone(),
            peers.clone(),
            POLL,
            vec!["stun:stun.example:3478".to_string()],
        );
        Harness {
            api,
            media,
            peers,
            engine,
        }
    }

    /// Session for call 1 with alice in slot 0 and, optionally, an offer.
    fn waiting_session(offer: Option<&str>) -> CallSession {
        let mut session = CallSession::new(pid("alice"));
        session.offer = offer.map(str::to_string);
        session
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_start_call_publishes_offer() {
        let h = harness(
            MockCallApi::empty(pid("alice")),
            FakeMediaCapture::new(),
            FakePeerFactory::new("alice", vec!["a1".to_string()]),
        );

        let call = h.engine.start_call().await.unwrap();

        assert_eq!(call.role(), Slot::Initiator);
        assert_eq!(call.state(), CallState::Negotiating);
        let session = h.api.session().await.unwrap();
        assert_eq!(session.offer.as_deref(), Some("offer-alice-1"));

        let peer = h.peers.last().await.unwrap();
        assert_eq!(peer.ice_servers().await, vec!["stun:stun.example:3478".to_string()]);
        assert_eq!(peer.local_media().await.len(), 1);

        // Local candidate is pushed without waiting for a poll
        let api = h.api.clone();
        eventually(|| {
            let api = api.clone();
            async move {
                api.session()
                    .await
                    .is_some_and(|s| s.candidates(Slot::Initiator) == ["a1"])
            }
        })
        .await;
    }

    #[tokio::test]
    async fn test_initiator_connects_when_answer_arrives() {
        let h = harness(
            MockCallApi::empty(pid("alice")),
            FakeMediaCapture::new(),
            FakePeerFactory::new("alice", Vec::new()),
        );
        let call = h.engine.start_call().await.unwrap();
        let mut states = call.subscribe();

        h.api
            .edit_session(|s| {
                *s.participant_mut(Slot::Joiner) = Some(pid("bob"));
                s.answer = Some("ANSWER_B".to_string());
                s.candidates_mut(Slot::Joiner).push("b1".to_string());
            })
            .await;

        states
            .wait_for(|s| *s == CallState::Connected)
            .await
            .unwrap();
        let peer = h.peers.last().await.unwrap();
        assert_eq!(peer.remote_descriptions().await, vec!["ANSWER_B".to_string()]);
        eventually(|| {
            let peer = peer.clone();
            async move { peer.remote_candidates().await == vec!["b1".to_string()] }
        })
        .await;
    }

    #[tokio::test]
    async fn test_repeated_polls_do_not_reapply_candidates() {
        let mut session = waiting_session(Some("OFFER_A"));
        session.candidates_mut(Slot::Initiator).push("a1".to_string());
        let h = harness(
            MockCallApi::with_session(pid("bob"), CallId(1), session),
            FakeMediaCapture::new(),
            FakePeerFactory::new("bob", Vec::new()),
        );

        let _call = h.engine.join_call(CallId(1)).await.unwrap();

        let api = h.api.clone();
        eventually(|| {
            let api = api.clone();
            async move { api.get_calls() >= 5 }
        })
        .await;
        let peer = h.peers.last().await.unwrap();
        assert_eq!(peer.candidate_attempts().await, 1);
        assert_eq!(peer.remote_descriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_joiner_answers_offer_from_snapshot() {
        let h = harness(
            MockCallApi::with_session(pid("bob"), CallId(1), waiting_session(Some("OFFER_A"))),
            FakeMediaCapture::new(),
            FakePeerFactory::new("bob", Vec::new()),
        );

        let call = h.engine.join_call(CallId(1)).await.unwrap();

        assert_eq!(call.role(), Slot::Joiner);
        let session = h.api.session().await.unwrap();
        assert_eq!(session.answer.as_deref(), Some("answer-bob-1"));
        assert_eq!(h.api.answer_calls(), 1);
    }

    #[tokio::test]
    async fn test_joiner_without_offer_answers_after_polling() {
        let h = harness(
            MockCallApi::with_session(pid("bob"), CallId(1), waiting_session(None)),
            FakeMediaCapture::new(),
            FakePeerFactory::new("bob", Vec::new()),
        );
        let _call = h.engine.join_call(CallId(1)).await.unwrap();
        assert_eq!(h.api.answer_calls(), 0);

        h.api
            .edit_session(|s| s.offer = Some("OFFER_A".to_string()))
            .await;

        let api = h.api.clone();
        eventually(|| {
            let api = api.clone();
            async move { api.session().await.and_then(|s| s.answer).is_some() }
        })
        .await;
    }

    #[tokio::test]
    async fn test_failed_answer_is_retried() {
        let api = MockCallApi::with_session(pid("bob"), CallId(1), waiting_session(Some("OFFER_A")));
        api.fail_next_answers(2);
        let h = harness(api, FakeMediaCapture::new(), FakePeerFactory::new("bob", Vec::new()));

        let _call = h.engine.join_call(CallId(1)).await.unwrap();
        assert!(h.api.session().await.unwrap().answer.is_none());

        let api = h.api.clone();
        eventually(|| {
            let api = api.clone();
            async move { api.session().await.and_then(|s| s.answer).is_some() }
        })
        .await;
        assert_eq!(h.api.answer_calls(), 3);
    }

    #[tokio::test]
    async fn test_remote_end_releases_resources_once() {
        let h = harness(
            MockCallApi::empty(pid("alice")),
            FakeMediaCapture::new(),
            FakePeerFactory::new("alice", Vec::new()),
        );
        let call = h.engine.start_call().await.unwrap();

        h.api.remove_session().await;

        assert_eq!(call.ended().await, EndReason::Remote);
        assert_eq!(call.state(), CallState::Ended(EndReason::Remote));
        let peer = h.peers.last().await.unwrap();
        assert_eq!(peer.close_count(), 1);
        assert_eq!((h.media.acquired(), h.media.released()), (1, 1));

        // Ending afterwards is a no-op
        call.end().await.unwrap();
        assert_eq!(h.api.end_calls(), 0);
        assert_eq!(h.media.released(), 1);
    }

    #[tokio::test]
    async fn test_local_end_is_terminal_and_idempotent() {
        let h = harness(
            MockCallApi::empty(pid("alice")),
            FakeMediaCapture::new(),
            FakePeerFactory::new("alice", Vec::new()),
        );
        let call = h.engine.start_call().await.unwrap();

        call.end().await.unwrap();
        call.end().await.unwrap();

        assert_eq!(call.state(), CallState::Ended(EndReason::Local));
        assert!(h.api.session().await.is_none());
        assert_eq!(h.api.end_calls(), 1);
        assert_eq!(h.peers.last().await.unwrap().close_count(), 1);
        assert_eq!(h.media.released(), 1);

        // Poller has stopped
        let polls = h.api.get_calls();
        tokio::time::sleep(POLL * 5).await;
        assert_eq!(h.api.get_calls(), polls);
    }

    #[tokio::test]
    async fn test_media_failure_after_initialize_ends_call() {
        let h = harness(
            MockCallApi::empty(pid("alice")),
            FakeMediaCapture::failing(),
            FakePeerFactory::new("alice", Vec::new()),
        );

        let result = h.engine.start_call().await;

        assert!(matches!(result, Err(ClientError::Media(_))));
        assert_eq!(h.api.end_calls(), 1);
        assert!(h.api.session().await.is_none());
        assert!(h.peers.last().await.is_none());
    }

    #[tokio::test]
    async fn test_peer_failure_releases_media() {
        let h = harness(
            MockCallApi::empty(pid("alice")),
            FakeMediaCapture::new(),
            FakePeerFactory::failing(),
        );

        let result = h.engine.start_call().await;

        assert!(matches!(result, Err(ClientError::PeerConnection(_))));
        assert_eq!((h.media.acquired(), h.media.released()), (1, 1));
        assert_eq!(h.api.end_calls(), 1);
    }

    #[tokio::test]
    async fn test_join_full_call_acquires_nothing() {
        let mut session = waiting_session(Some("OFFER_A"));
        *session.participant_mut(Slot::Joiner) = Some(pid("carol"));
        let h = harness(
            MockCallApi::with_session(pid("bob"), CallId(1), session),
            FakeMediaCapture::new(),
            FakePeerFactory::new("bob", Vec::new()),
        );

        let result = h.engine.join_call(CallId(1)).await;

        assert!(matches!(result, Err(ClientError::CallFull(_))));
        assert_eq!(h.media.acquired(), 0);
        assert_eq!(h.api.end_calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_poll_failures_keep_polling() {
        let api = MockCallApi::empty(pid("alice"));
        api.fail_next_gets(2);
        let h = harness(api, FakeMediaCapture::new(), FakePeerFactory::new("alice", Vec::new()));
        let call = h.engine.start_call().await.unwrap();
        let mut states = call.subscribe();

        h.api
            .edit_session(|s| {
                *s.participant_mut(Slot::Joiner) = Some(pid("bob"));
                s.answer = Some("ANSWER_B".to_string());
            })
            .await;

        tokio::time::timeout(
            Duration::from_secs(2),
            states.wait_for(|s| *s == CallState::Connected),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(h.api.get_calls() >= 3);
        assert!(!call.state().is_ended());
        assert_eq!(h.media.released(), 0);
    }

    #[tokio::test]
    async fn test_failed_local_candidate_is_dropped() {
        let api = MockCallApi::empty(pid("alice"));
        api.fail_next_candidates(1);
        let h = harness(
            api,
            FakeMediaCapture::new(),
            FakePeerFactory::new(
                "alice",
                vec!["a1".to_string(), "a2".to_string(), "a3".to_string()],
            ),
        );

        let call = h.engine.start_call().await.unwrap();

        let api = h.api.clone();
        eventually(|| {
            let api = api.clone();
            async move {
                api.session()
                    .await
                    .is_some_and(|s| s.candidates(Slot::Initiator) == ["a2", "a3"])
            }
        })
        .await;
        assert_eq!(h.api.candidate_calls(), 3);
        assert_eq!(call.state(), CallState::Negotiating);
    }
}
