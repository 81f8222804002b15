use super::handle::SessionHandle;
use super::state::{reduce, AttemptId, Effect, Event, FailureCause, SessionPhase, SessionState};
use super::status::{SessionStatus, SessionUpdate};
use super::transcript::TranscriptLog;
use crate::audio::{AudioDeviceManager, MicrophoneHandle};
use crate::conversation::{ConversationClient, ConversationEvents, SessionOpenPayload};
use crate::profile::ProfileRepository;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Settings the controller needs beyond its collaborators
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Agent that conducts the interview
    pub agent_id: String,

    /// End a connected session after this long
    pub max_session_duration: Option<Duration>,
}

/// Drives one candidate's interview lifecycle.
///
/// Owns the state, the transcript and the held microphone. Everything it
/// reacts to arrives through a single queue and is applied one event at a
/// time; slow collaborator calls run as tasks that report back into the same
/// queue.
pub struct SessionController {
    state: SessionState,
    transcript: TranscriptLog,

    /// Microphone held for the current attempt
    microphone: Option<MicrophoneHandle>,
    pending_acquire: Option<(AttemptId, JoinHandle<()>)>,
    pending_open: Option<JoinHandle<()>>,
    time_limit: Option<JoinHandle<()>>,
    teardown: Option<JoinHandle<()>>,

    profiles: Arc<dyn ProfileRepository>,
    devices: Arc<dyn AudioDeviceManager>,
    conversation: Arc<dyn ConversationClient>,
    settings: SessionSettings,

    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    status_tx: watch::Sender<SessionStatus>,
    updates_tx: broadcast::Sender<SessionUpdate>,
}

impl SessionController {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        devices: Arc<dyn AudioDeviceManager>,
        conversation: Arc<dyn ConversationClient>,
        settings: SessionSettings,
    ) -> (Self, SessionHandle) {
        let state = SessionState::Idle;
        let mut transcript = TranscriptLog::new();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) =
            watch::channel(SessionStatus::capture(&state, transcript.snapshot()));
        let (updates_tx, _) = broadcast::channel(64);

        let handle = SessionHandle::new(events_tx.clone(), status_rx, updates_tx.clone());

        let controller = Self {
            state,
            transcript,
            microphone: None,
            pending_acquire: None,
            pending_open: None,
            time_limit: None,
            teardown: None,
            profiles,
            devices,
            conversation,
            settings,
            events_tx,
            events_rx,
            status_tx,
            updates_tx,
        };

        (controller, handle)
    }

    /// Run the controller on the current tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process events until [`SessionHandle::shutdown`] is called
    pub async fn run(mut self) {
        info!("Session controller started");

        while let Some(event) = self.events_rx.recv().await {
            if matches!(event, Event::Shutdown) {
                self.shutdown().await;
                break;
            }
            self.handle(event).await;
        }

        info!("Session controller stopped");
    }

    async fn handle(&mut self, event: Event) {
        let before = (
            self.state.phase(),
            self.state.attempt(),
            self.state.failure().cloned(),
        );

        let (next, effects) = reduce(&self.state, event);
        self.state = next;

        for effect in effects {
            self.run_effect(effect).await;
        }

        self.publish(before);
    }

    async fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::FetchProfile {
                attempt,
                candidate_id,
            } => {
                info!("Resolving profile for candidate {}", candidate_id);
                let profiles = Arc::clone(&self.profiles);
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    let result = profiles.fetch(&candidate_id).await;
                    let _ = tx.send(Event::ProfileResolved { attempt, result });
                });
            }

            Effect::ClearTranscript => {
                self.transcript.clear();
            }

            Effect::AcquireMicrophone { attempt } => {
                info!("Requesting microphone for attempt {}", attempt);
                let devices = Arc::clone(&self.devices);
                let tx = self.events_tx.clone();
                let task = tokio::spawn(async move {
                    let result = devices.acquire().await;
                    // Nobody left to own the handle
                    if let Err(mpsc::error::SendError(Event::MicrophoneAcquired {
                        result: Ok(handle),
                        ..
                    })) = tx.send(Event::MicrophoneAcquired { attempt, result })
                    {
                        devices.release(&handle).await;
                    }
                });
                self.pending_acquire = Some((attempt, task));
            }

            Effect::CancelAcquire { attempt } => {
                if let Some((pending, task)) = self.pending_acquire.take() {
                    if pending == attempt {
                        info!("Cancelling microphone request for attempt {}", attempt);
                        task.abort();
                    }
                }
            }

            Effect::HoldMicrophone(handle) => {
                self.pending_acquire = None;
                if let Some(previous) = self.microphone.replace(handle) {
                    warn!("Replacing a microphone that was still held");
                    self.devices.release(&previous).await;
                }
            }

            Effect::OpenSession { attempt, params } => {
                let payload = SessionOpenPayload::new(&self.settings.agent_id, &params);
                let uplink = self.microphone.as_mut().and_then(|m| m.take_uplink());
                let events = ConversationEvents::new(attempt, self.events_tx.clone());
                let conversation = Arc::clone(&self.conversation);

                info!(
                    "Opening agent session for {} ({} @ {})",
                    params.candidate_name, params.job_title, params.company_name
                );

                self.pending_open = Some(tokio::spawn(async move {
                    if let Err(e) = conversation.open(payload, uplink, events.clone()).await {
                        warn!("Agent session did not open: {}", e);
                        events.error(e.to_string());
                    }
                }));
            }

            Effect::AppendMessage(message) => {
                debug!("{:?}: {}", message.source, message.text);
                self.transcript.append(message);
            }

            Effect::ApplyMute { attempt, muted } => {
                let applied = match &self.microphone {
                    Some(handle) => self.devices.set_muted(handle, muted).map_err(|e| {
                        error!("Failed to change mute state: {}", e);
                    }),
                    None => {
                        warn!("Mute requested without a held microphone");
                        Err(())
                    }
                };
                if applied.is_err() {
                    let _ = self.events_tx.send(Event::MuteFailed { attempt, muted });
                }
            }

            Effect::StartTimeLimit { attempt } => {
                self.pending_open = None;
                if let Some(limit) = self.settings.max_session_duration {
                    let tx = self.events_tx.clone();
                    self.time_limit = Some(tokio::spawn(async move {
                        tokio::time::sleep(limit).await;
                        let _ = tx.send(Event::TimeLimitReached { attempt });
                    }));
                }
            }

            Effect::Teardown { attempt } => {
                info!("Tearing down attempt {}", attempt);

                if let Some(timer) = self.time_limit.take() {
                    timer.abort();
                }

                let pending_open = self.pending_open.take();
                let microphone = self.microphone.take();
                let conversation = Arc::clone(&self.conversation);
                let devices = Arc::clone(&self.devices);
                let tx = self.events_tx.clone();

                self.teardown = Some(tokio::spawn(async move {
                    if let Some(open) = pending_open {
                        open.abort();
                        let _ = open.await;
                    }

                    conversation.close().await;

                    if let Some(handle) = microphone {
                        devices.release(&handle).await;
                    }

                    let _ = tx.send(Event::TeardownComplete { attempt });
                }));
            }

            Effect::ReleaseHeldMicrophone => {
                self.pending_open = None;
                if let Some(handle) = self.microphone.take() {
                    self.devices.release(&handle).await;
                }
            }

            Effect::ReleaseMicrophone(handle) => {
                self.devices.release(&handle).await;
            }
        }
    }

    /// Push the new status to watchers and announce phase, attempt and
    /// failure changes
    fn publish(&mut self, before: (SessionPhase, Option<AttemptId>, Option<FailureCause>)) {
        let status = SessionStatus::capture(&self.state, self.transcript.snapshot());
        let after = (status.phase, self.state.attempt(), status.failure.clone());

        if after != before {
            match &status.failure {
                Some(cause) => warn!("Session {:?} -> {:?}: {}", before.0, after.0, cause),
                None => info!("Session {:?} -> {:?}", before.0, after.0),
            }

            let _ = self.updates_tx.send(SessionUpdate {
                phase: status.phase,
                failure: status.failure.clone(),
                at: Utc::now(),
            });
        }

        self.status_tx.send_replace(status);
    }

    async fn shutdown(&mut self) {
        info!("Shutting down session controller in {:?}", self.state.phase());

        if let Some((_, task)) = self.pending_acquire.take() {
            task.abort();
        }
        if let Some(timer) = self.time_limit.take() {
            timer.abort();
        }
        if let Some(open) = self.pending_open.take() {
            open.abort();
            let _ = open.await;
        }

        // While disconnecting, the teardown task owns the transport and the
        // microphone; let it finish both
        if let Some(teardown) = self.teardown.take() {
            if let Err(e) = teardown.await {
                error!("Teardown task failed: {}", e);
            }
        }

        if matches!(
            self.state.phase(),
            SessionPhase::Connecting | SessionPhase::Connected
        ) {
            self.conversation.close().await;
        }

        if let Some(handle) = self.microphone.take() {
            self.devices.release(&handle).await;
        }
    }
}
