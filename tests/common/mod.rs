// Scripted collaborators for driving the session controller in tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;
use voice_interview::audio::{AudioDeviceManager, AudioError, AudioFrame, MicrophoneHandle};
use voice_interview::conversation::{
    ConversationClient, ConversationError, ConversationEvents, SessionOpenPayload,
};
use voice_interview::profile::{CandidateProfile, ProfileError, ProfileRepository, Resume};
use voice_interview::session::{SessionController, SessionHandle, SessionSettings};

pub const AGENT_ID: &str = "agent_test";

/// Fail the test instead of hanging when the controller never gets there
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out waiting for the session")
}

pub fn resume(skills: &[&str], location: &str) -> CandidateProfile {
    CandidateProfile {
        resume: Some(Resume {
            skills: skills.iter().map(|s| s.to_string()).collect(),
            suggested_location: location.to_string(),
        }),
    }
}

// ============================================================================
// Profiles
// ============================================================================

#[derive(Default)]
pub struct StaticProfiles {
    profiles: Mutex<HashMap<String, CandidateProfile>>,
    /// Answers served before falling back to the stored profiles
    scripted: Mutex<VecDeque<Result<CandidateProfile, ProfileError>>>,
    calls: AtomicUsize,
}

impl StaticProfiles {
    pub fn with(candidate_id: &str, profile: CandidateProfile) -> Self {
        let profiles = Self::default();
        profiles.insert(candidate_id, profile);
        profiles
    }

    pub fn insert(&self, candidate_id: &str, profile: CandidateProfile) {
        self.profiles
            .lock()
            .unwrap()
            .insert(candidate_id.to_string(), profile);
    }

    pub fn answer_next(&self, result: Result<CandidateProfile, ProfileError>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProfileRepository for StaticProfiles {
    async fn fetch(&self, candidate_id: &str) -> Result<CandidateProfile, ProfileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(result) = self.scripted.lock().unwrap().pop_front() {
            return result;
        }

        self.profiles
            .lock()
            .unwrap()
            .get(candidate_id)
            .cloned()
            .ok_or(ProfileError::NotFound)
    }
}

// ============================================================================
// Microphones
// ============================================================================

pub struct FakeMicrophones {
    held: Mutex<HashSet<Uuid>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    mute_calls: Mutex<Vec<bool>>,
    deny: AtomicBool,
    failing_mute: AtomicBool,
    /// Each acquire waits for one permit while blocking is on
    blocking: AtomicBool,
    gate: Semaphore,
}

impl FakeMicrophones {
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            mute_calls: Mutex::new(Vec::new()),
            deny: AtomicBool::new(false),
            failing_mute: AtomicBool::new(false),
            blocking: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    pub fn deny_permission(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    /// Make later mute changes fail at the device, or work again
    pub fn fail_mute(&self, failing: bool) {
        self.failing_mute.store(failing, Ordering::SeqCst);
    }

    /// Hold every acquire as if the permission prompt were still open
    pub fn block(&self) {
        self.blocking.store(true, Ordering::SeqCst);
    }

    /// Let one blocked acquire through
    pub fn grant(&self) {
        self.gate.add_permits(1);
    }

    pub fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn mute_calls(&self) -> Vec<bool> {
        self.mute_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AudioDeviceManager for FakeMicrophones {
    async fn acquire(&self) -> Result<MicrophoneHandle, AudioError> {
        if self.blocking.load(Ordering::SeqCst) {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| AudioError::Device(e.to_string()))?;
            permit.forget();
        }

        if self.deny.load(Ordering::SeqCst) {
            return Err(AudioError::PermissionDenied);
        }

        let (_tx, rx) = mpsc::channel::<AudioFrame>(8);
        let handle = MicrophoneHandle::new(Some(rx));
        self.held.lock().unwrap().insert(handle.id());
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    fn set_muted(&self, handle: &MicrophoneHandle, muted: bool) -> Result<(), AudioError> {
        if !self.held.lock().unwrap().contains(&handle.id()) {
            return Err(AudioError::Device("handle not held".to_string()));
        }
        if self.failing_mute.load(Ordering::SeqCst) {
            return Err(AudioError::Device("mute control unavailable".to_string()));
        }
        self.mute_calls.lock().unwrap().push(muted);
        Ok(())
    }

    async fn release(&self, handle: &MicrophoneHandle) {
        if self.held.lock().unwrap().remove(&handle.id()) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// Agent
// ============================================================================

#[derive(Debug, Clone)]
pub enum OpenBehavior {
    /// Confirm the session right away
    Connect,
    /// Return an error from `open`
    Fail(String),
    /// Accept the session but never confirm it
    Hang,
}

pub struct FakeAgent {
    behavior: Mutex<OpenBehavior>,
    payloads: Mutex<Vec<SessionOpenPayload>>,
    current: Mutex<Option<ConversationEvents>>,
    sessions: mpsc::UnboundedSender<ConversationEvents>,
    closes: AtomicUsize,
    close_delay: Mutex<Duration>,
}

impl FakeAgent {
    /// The receiver yields the event sink of every session that was opened
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConversationEvents>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let agent = Self {
            behavior: Mutex::new(OpenBehavior::Connect),
            payloads: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            sessions,
            closes: AtomicUsize::new(0),
            close_delay: Mutex::new(Duration::ZERO),
        };
        (agent, rx)
    }

    pub fn behave(&self, behavior: OpenBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Make `close` take this long before it reports back
    pub fn slow_close(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = delay;
    }

    pub fn payloads(&self) -> Vec<SessionOpenPayload> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }
}

#[async_trait::async_trait]
impl ConversationClient for FakeAgent {
    async fn open(
        &self,
        payload: SessionOpenPayload,
        _uplink: Option<mpsc::Receiver<AudioFrame>>,
        events: ConversationEvents,
    ) -> Result<(), ConversationError> {
        self.payloads.lock().unwrap().push(payload);
        let behavior = self.behavior.lock().unwrap().clone();

        match behavior {
            OpenBehavior::Fail(reason) => Err(ConversationError::Connect(reason)),
            OpenBehavior::Connect | OpenBehavior::Hang => {
                if matches!(behavior, OpenBehavior::Connect) {
                    events.connected();
                }
                *self.current.lock().unwrap() = Some(events.clone());
                let _ = self.sessions.send(events);
                Ok(())
            }
        }
    }

    async fn close(&self) {
        let delay = *self.close_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(events) = self.current.lock().unwrap().take() {
            events.disconnected();
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub session: SessionHandle,
    pub profiles: Arc<StaticProfiles>,
    pub microphones: Arc<FakeMicrophones>,
    pub agent: Arc<FakeAgent>,
    pub agent_sessions: mpsc::UnboundedReceiver<ConversationEvents>,
    pub controller: JoinHandle<()>,
}

impl Harness {
    pub fn new(profiles: StaticProfiles) -> Self {
        Self::with_limit(profiles, None)
    }

    pub fn with_limit(profiles: StaticProfiles, max_session_duration: Option<Duration>) -> Self {
        let profiles = Arc::new(profiles);
        let microphones = Arc::new(FakeMicrophones::new());
        let (agent, agent_sessions) = FakeAgent::new();
        let agent = Arc::new(agent);

        let (controller, session) = SessionController::new(
            profiles.clone(),
            microphones.clone(),
            agent.clone(),
            SessionSettings {
                agent_id: AGENT_ID.to_string(),
                max_session_duration,
            },
        );

        Self {
            session,
            profiles,
            microphones,
            agent,
            agent_sessions,
            controller: controller.spawn(),
        }
    }

    /// Event sink of the next session the agent opened
    pub async fn next_agent_session(&mut self) -> ConversationEvents {
        within(self.agent_sessions.recv())
            .await
            .expect("agent channel closed")
    }
}
