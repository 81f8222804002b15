use super::params::BootstrapParams;
use super::state::{Event, SessionPhase};
use super::status::{SessionStatus, SessionUpdate};
use super::transcript::Message;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session controller is not running")]
pub struct ControllerGone;

/// The presentation layer's only way to talk to the session.
///
/// Commands are queued behind any collaborator events already waiting, so the
/// controller sees one serialized stream. Reads never block the controller.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Event>,
    status: watch::Receiver<SessionStatus>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Event>,
        status: watch::Receiver<SessionStatus>,
        updates: broadcast::Sender<SessionUpdate>,
    ) -> Self {
        Self {
            tx,
            status,
            updates,
        }
    }

    fn send(&self, event: Event) -> Result<(), ControllerGone> {
        self.tx.send(event).map_err(|_| ControllerGone)
    }

    /// Resolve the candidate profile and become ready
    pub fn bootstrap(&self, params: BootstrapParams) -> Result<(), ControllerGone> {
        self.send(Event::Bootstrap(params))
    }

    /// Re-run bootstrap with the parameters of the failed attempt
    pub fn retry(&self) -> Result<(), ControllerGone> {
        self.send(Event::Retry)
    }

    pub fn start(&self) -> Result<(), ControllerGone> {
        self.send(Event::Start)
    }

    pub fn end(&self) -> Result<(), ControllerGone> {
        self.send(Event::End)
    }

    pub fn set_muted(&self, muted: bool) -> Result<(), ControllerGone> {
        self.send(Event::SetMuted(muted))
    }

    /// Release everything and stop the controller loop
    pub fn shutdown(&self) -> Result<(), ControllerGone> {
        self.send(Event::Shutdown)
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn transcript(&self) -> Arc<[Message]> {
        Arc::clone(&self.status.borrow().transcript)
    }

    /// Phase changes from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Wait until the published status satisfies `predicate`
    pub async fn wait_until<F>(&self, mut predicate: F) -> Result<SessionStatus, ControllerGone>
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| ControllerGone)?;
        Ok(matched.clone())
    }

    pub async fn wait_for_phase(&self, phase: SessionPhase) -> Result<SessionStatus, ControllerGone> {
        self.wait_until(|s| s.phase == phase).await
    }
}
