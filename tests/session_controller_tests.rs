// Integration tests for the session controller
//
// Each test drives a real controller against scripted collaborators and
// observes it only through the SessionHandle, the way the HTTP layer does.

mod common;

use common::{resume, within, FakeMicrophones, Harness, OpenBehavior, StaticProfiles, AGENT_ID};
use std::time::Duration;
use voice_interview::conversation::TransportKind;
use voice_interview::profile::{CandidateProfile, ProfileError};
use voice_interview::session::{
    BootstrapParams, FailureCause, Message, SessionPhase, SessionStatus, Speaker,
};

fn ana() -> BootstrapParams {
    BootstrapParams {
        candidate_id: Some("u1".to_string()),
        candidate_name: Some("Ana".to_string()),
        job_title: Some("Backend Engineer".to_string()),
        company_name: Some("Acme".to_string()),
        job_description: Some("APIs em Go".to_string()),
    }
}

async fn ready(harness: &Harness, params: BootstrapParams) -> SessionStatus {
    harness.session.bootstrap(params).unwrap();
    within(harness.session.wait_for_phase(SessionPhase::Ready))
        .await
        .unwrap()
}

async fn connected(harness: &Harness) -> SessionStatus {
    harness.session.start().unwrap();
    within(harness.session.wait_for_phase(SessionPhase::Connected))
        .await
        .unwrap()
}

async fn failed(harness: &Harness) -> FailureCause {
    let status = within(harness.session.wait_for_phase(SessionPhase::Failed))
        .await
        .unwrap();
    status.failure.expect("failed status carries a cause")
}

// ============================================================================
// Bootstrap
// ============================================================================

#[tokio::test]
async fn test_bootstrap_resolves_profile_once() {
    let harness = Harness::new(StaticProfiles::with("u1", resume(&["Go"], "Remote")));

    let status = ready(&harness, ana()).await;

    assert_eq!(status.candidate_name.as_deref(), Some("Ana"));
    assert_eq!(status.job_title.as_deref(), Some("Backend Engineer"));
    assert_eq!(status.action_label, "Começar Entrevista");
    assert_eq!(harness.profiles.calls(), 1);
}

#[tokio::test]
async fn test_bootstrap_without_identifier_fails_without_lookup() {
    let harness = Harness::new(StaticProfiles::default());

    harness
        .session
        .bootstrap(BootstrapParams {
            candidate_id: None,
            ..ana()
        })
        .unwrap();

    assert_eq!(failed(&harness).await, FailureCause::MissingIdentifier);
    assert_eq!(harness.profiles.calls(), 0);
}

#[tokio::test]
async fn test_empty_identifier_counts_as_missing() {
    let harness = Harness::new(StaticProfiles::default());

    harness
        .session
        .bootstrap(BootstrapParams {
            candidate_id: Some(String::new()),
            ..ana()
        })
        .unwrap();

    assert_eq!(failed(&harness).await, FailureCause::MissingIdentifier);
    assert_eq!(harness.profiles.calls(), 0);
}

#[tokio::test]
async fn test_whitespace_identifier_is_looked_up_as_given() {
    let harness = Harness::new(StaticProfiles::with(" u1 ", CandidateProfile::default()));

    harness
        .session
        .bootstrap(BootstrapParams {
            candidate_id: Some(" u1 ".to_string()),
            ..ana()
        })
        .unwrap();

    within(harness.session.wait_for_phase(SessionPhase::Ready))
        .await
        .unwrap();
    assert_eq!(harness.profiles.calls(), 1);
}

#[tokio::test]
async fn test_unknown_candidate_fails_with_not_found() {
    let harness = Harness::new(StaticProfiles::default());

    harness
        .session
        .bootstrap(BootstrapParams::for_candidate("nobody"))
        .unwrap();

    assert_eq!(failed(&harness).await, FailureCause::ProfileNotFound);
}

#[tokio::test]
async fn test_retry_after_transport_error_reaches_ready() {
    let profiles = StaticProfiles::with("u1", CandidateProfile::default());
    profiles.answer_next(Err(ProfileError::Transport("connection reset".to_string())));
    let harness = Harness::new(profiles);

    harness.session.bootstrap(ana()).unwrap();
    assert_eq!(
        failed(&harness).await,
        FailureCause::ProfileTransport("connection reset".to_string())
    );

    harness.session.retry().unwrap();
    let status = within(harness.session.wait_for_phase(SessionPhase::Ready))
        .await
        .unwrap();

    assert_eq!(status.candidate_name.as_deref(), Some("Ana"));
    assert_eq!(harness.profiles.calls(), 2);
}

#[tokio::test]
async fn test_failure_is_broadcast_to_subscribers() {
    let harness = Harness::new(StaticProfiles::default());
    let mut updates = harness.session.subscribe();

    harness
        .session
        .bootstrap(BootstrapParams::for_candidate("nobody"))
        .unwrap();

    let mut phases = Vec::new();
    loop {
        let update = within(updates.recv()).await.unwrap();
        phases.push(update.phase);
        if update.phase == SessionPhase::Failed {
            assert_eq!(update.failure, Some(FailureCause::ProfileNotFound));
            break;
        }
    }
    assert_eq!(phases, vec![SessionPhase::ResolvingProfile, SessionPhase::Failed]);
}

#[tokio::test]
async fn test_new_failure_cause_is_broadcast_while_failed() {
    let harness = Harness::new(StaticProfiles::default());
    let mut updates = harness.session.subscribe();

    harness
        .session
        .bootstrap(BootstrapParams::for_candidate("nobody"))
        .unwrap();
    assert_eq!(failed(&harness).await, FailureCause::ProfileNotFound);
    while updates.try_recv().is_ok() {}

    // Failed -> Failed with a different cause
    harness.session.bootstrap(BootstrapParams::default()).unwrap();
    let update = within(updates.recv()).await.unwrap();

    assert_eq!(update.phase, SessionPhase::Failed);
    assert_eq!(update.failure, Some(FailureCause::MissingIdentifier));
    assert_eq!(
        harness.session.status().failure,
        Some(FailureCause::MissingIdentifier)
    );
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_full_interview_round_trip() {
    let mut harness = Harness::new(StaticProfiles::with("u1", resume(&["Go", "SQL"], "Remote")));
    ready(&harness, ana()).await;

    let status = connected(&harness).await;
    assert!(status.connected_at.is_some());
    assert!(!status.muted);
    assert_eq!(status.action_label, "Encerrar Entrevista");

    let payloads = harness.agent.payloads();
    assert_eq!(payloads.len(), 1);
    let payload = &payloads[0];
    assert_eq!(payload.agent_identifier, AGENT_ID);
    assert_eq!(payload.transport_kind, TransportKind::WebSocket);
    assert_eq!(payload.variables.job_title, "Backend Engineer");
    assert_eq!(payload.variables.company_name, "Acme");
    assert_eq!(payload.variables.job_description, "APIs em Go");
    assert_eq!(payload.variables.candidate_name, "Ana");
    assert_eq!(
        payload.variables.candidate_resume,
        "Skills: Go, SQL. Localização: Remote."
    );

    let agent = harness.next_agent_session().await;
    agent.message(Message::candidate("Oi"));
    agent.message(Message::agent("Olá Ana"));

    let status = within(harness.session.wait_until(|s| s.transcript_len == 2))
        .await
        .unwrap();
    let sources: Vec<Speaker> = status.transcript.iter().map(|m| m.source).collect();
    let texts: Vec<&str> = status.transcript.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(sources, vec![Speaker::Candidate, Speaker::Agent]);
    assert_eq!(texts, vec!["Oi", "Olá Ana"]);

    harness.session.end().unwrap();
    let status = within(harness.session.wait_for_phase(SessionPhase::Ready))
        .await
        .unwrap();

    assert_eq!(status.transcript_len, 2);
    assert_eq!(status.action_label, "Nova Entrevista");
    assert!(status.connected_at.is_none());
    assert_eq!(harness.microphones.held(), 0);
    assert_eq!(harness.microphones.released(), 1);
    assert_eq!(harness.agent.closes(), 1);
}

#[tokio::test]
async fn test_missing_resume_uses_default_context() {
    let harness = Harness::new(StaticProfiles::with("u2", CandidateProfile::default()));
    ready(&harness, BootstrapParams::for_candidate("u2")).await;
    connected(&harness).await;

    let payloads = harness.agent.payloads();
    let payload = &payloads[0];
    assert_eq!(
        payload.variables.candidate_resume,
        "Skills: Geral. Localização: Brasil."
    );
    assert_eq!(payload.variables.candidate_name, "Candidato");
    assert_eq!(payload.variables.job_title, "Vaga");
    assert_eq!(payload.variables.company_name, "Empresa");
    assert_eq!(payload.variables.job_description, "");
}

#[tokio::test]
async fn test_new_session_clears_previous_transcript() {
    let mut harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;

    connected(&harness).await;
    let first = harness.next_agent_session().await;
    first.message(Message::agent("primeira"));
    within(harness.session.wait_until(|s| s.transcript_len == 1))
        .await
        .unwrap();

    harness.session.end().unwrap();
    within(harness.session.wait_for_phase(SessionPhase::Ready))
        .await
        .unwrap();

    let status = connected(&harness).await;
    assert_eq!(status.transcript_len, 0);

    // The old session is stale now
    first.message(Message::agent("fantasma"));
    let second = harness.next_agent_session().await;
    second.message(Message::agent("segunda"));

    let status = within(harness.session.wait_until(|s| s.transcript_len == 1))
        .await
        .unwrap();
    assert_eq!(status.transcript[0].text, "segunda");
}

// ============================================================================
// Mute
// ============================================================================

#[tokio::test]
async fn test_mute_is_applied_and_reset_for_next_session() {
    let harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;
    connected(&harness).await;

    harness.session.set_muted(true).unwrap();
    within(harness.session.wait_until(|s| s.muted)).await.unwrap();

    // Same value again is a no-op
    harness.session.set_muted(true).unwrap();
    harness.session.set_muted(false).unwrap();
    within(harness.session.wait_until(|s| !s.muted)).await.unwrap();
    assert_eq!(harness.microphones.mute_calls(), vec![true, false]);

    harness.session.set_muted(true).unwrap();
    within(harness.session.wait_until(|s| s.muted)).await.unwrap();

    harness.session.end().unwrap();
    let status = within(harness.session.wait_for_phase(SessionPhase::Ready))
        .await
        .unwrap();
    assert!(!status.muted);

    let status = connected(&harness).await;
    assert!(!status.muted);
}

#[tokio::test]
async fn test_failed_mute_is_reported_unmuted() {
    let harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;
    connected(&harness).await;

    harness.microphones.fail_mute(true);
    harness.session.set_muted(true).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = harness.session.status();
    assert_eq!(status.phase, SessionPhase::Connected);
    assert!(!status.muted);
    assert!(harness.microphones.mute_calls().is_empty());

    // Asking again reaches the device, so the state really went back to unmuted
    harness.microphones.fail_mute(false);
    harness.session.set_muted(true).unwrap();
    within(harness.session.wait_until(|s| s.muted)).await.unwrap();
    assert_eq!(harness.microphones.mute_calls(), vec![true]);
}

#[tokio::test]
async fn test_mute_outside_connected_is_ignored() {
    let harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;

    harness.session.set_muted(true).unwrap();
    let status = connected(&harness).await;

    assert!(!status.muted);
    assert!(harness.microphones.mute_calls().is_empty());
}

// ============================================================================
// Cancellation and failures
// ============================================================================

#[tokio::test]
async fn test_end_during_permission_prompt_returns_to_ready() {
    let harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;

    harness.microphones.block();
    harness.session.start().unwrap();
    within(harness.session.wait_for_phase(SessionPhase::AcquiringMedia))
        .await
        .unwrap();

    harness.session.end().unwrap();
    within(harness.session.wait_for_phase(SessionPhase::Ready))
        .await
        .unwrap();

    // Granting now must not resurrect the abandoned attempt
    harness.microphones.grant();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.session.status().phase, SessionPhase::Ready);
    assert_eq!(harness.microphones.held(), 0);
    assert!(harness.agent.payloads().is_empty());

    // The permit granted above serves the next attempt
    connected(&harness).await;
    assert_eq!(harness.microphones.held(), 1);
}

#[tokio::test]
async fn test_permission_denied_fails_without_opening_agent() {
    let harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;

    harness.microphones.deny_permission();
    harness.session.start().unwrap();

    assert_eq!(failed(&harness).await, FailureCause::PermissionDenied);
    assert!(harness.agent.payloads().is_empty());
    assert_eq!(harness.microphones.held(), 0);
}

#[tokio::test]
async fn test_connect_failure_releases_microphone() {
    let harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;

    harness.agent.behave(OpenBehavior::Fail("handshake refused".to_string()));
    harness.session.start().unwrap();

    match failed(&harness).await {
        FailureCause::AgentConnect(reason) => assert!(reason.contains("handshake refused")),
        other => panic!("unexpected cause {:?}", other),
    }
    assert_eq!(harness.microphones.acquired(), 1);
    assert_eq!(harness.microphones.released(), 1);
    assert_eq!(harness.microphones.held(), 0);
}

#[tokio::test]
async fn test_retry_after_connect_failure_goes_through_bootstrap() {
    let harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;

    harness.agent.behave(OpenBehavior::Fail("busy".to_string()));
    harness.session.start().unwrap();
    failed(&harness).await;

    harness.agent.behave(OpenBehavior::Connect);
    harness.session.retry().unwrap();
    within(harness.session.wait_for_phase(SessionPhase::Ready))
        .await
        .unwrap();
    connected(&harness).await;

    assert_eq!(harness.profiles.calls(), 2);
    assert_eq!(harness.agent.payloads().len(), 2);
}

#[tokio::test]
async fn test_end_while_connecting_tears_down() {
    let harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;

    harness.agent.behave(OpenBehavior::Hang);
    harness.session.start().unwrap();
    within(harness.session.wait_for_phase(SessionPhase::Connecting))
        .await
        .unwrap();

    harness.session.end().unwrap();
    within(harness.session.wait_for_phase(SessionPhase::Ready))
        .await
        .unwrap();

    assert_eq!(harness.microphones.held(), 0);
    assert_eq!(harness.agent.closes(), 1);
    assert!(!harness.agent.is_open());
}

#[tokio::test]
async fn test_agent_error_mid_session_fails_and_cleans_up() {
    let mut harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;
    connected(&harness).await;

    let agent = harness.next_agent_session().await;
    agent.error("agent crashed");

    assert_eq!(
        failed(&harness).await,
        FailureCause::AgentRuntime("agent crashed".to_string())
    );
    assert_eq!(harness.microphones.held(), 0);
    assert_eq!(harness.agent.closes(), 1);
}

#[tokio::test]
async fn test_remote_disconnect_returns_to_ready() {
    let mut harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;
    connected(&harness).await;

    let agent = harness.next_agent_session().await;
    agent.message(Message::agent("Obrigado, até logo"));
    agent.disconnected();

    let status = within(harness.session.wait_for_phase(SessionPhase::Ready))
        .await
        .unwrap();
    assert_eq!(status.transcript_len, 1);
    assert_eq!(harness.microphones.held(), 0);
}

#[tokio::test]
async fn test_time_limit_ends_session() {
    let harness = Harness::with_limit(
        StaticProfiles::with("u1", CandidateProfile::default()),
        Some(Duration::from_millis(100)),
    );
    ready(&harness, ana()).await;
    connected(&harness).await;

    within(harness.session.wait_for_phase(SessionPhase::Ready))
        .await
        .unwrap();
    assert_eq!(harness.microphones.held(), 0);
    assert_eq!(harness.agent.closes(), 1);
}

#[tokio::test]
async fn test_shutdown_releases_held_microphone() {
    let harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;
    connected(&harness).await;

    harness.session.shutdown().unwrap();
    within(harness.controller).await.unwrap();

    assert_eq!(harness.microphones.held(), 0);
    assert_eq!(harness.agent.closes(), 1);
    assert!(harness.session.start().is_err());
}

#[tokio::test]
async fn test_shutdown_waits_for_teardown_in_flight() {
    let harness = Harness::new(StaticProfiles::with("u1", CandidateProfile::default()));
    ready(&harness, ana()).await;
    connected(&harness).await;

    harness.agent.slow_close(Duration::from_millis(200));
    harness.session.end().unwrap();
    harness.session.shutdown().unwrap();
    within(harness.controller).await.unwrap();

    assert_eq!(harness.agent.closes(), 1);
    assert!(!harness.agent.is_open());
    assert_eq!(harness.microphones.held(), 0);
    assert_eq!(harness.microphones.released(), 1);
}

#[tokio::test]
async fn test_microphone_fake_counts_releases_once() {
    use voice_interview::audio::AudioDeviceManager;

    let microphones = FakeMicrophones::new();
    let handle = microphones.acquire().await.unwrap();
    microphones.release(&handle).await;
    microphones.release(&handle).await;

    assert_eq!(microphones.released(), 1);
}
