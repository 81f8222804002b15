//! Wire messages of the realtime agent WebSocket
//!
//! Text frames carry one JSON object each. Client messages are tagged with
//! `type`, except the audio chunk which is a bare `{"user_audio_chunk": ..}`.

use super::client::DynamicVariables;
use crate::audio::AudioFrame;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Messages sent by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message after the handshake; configures the interview
    ConversationInitiationClientData { dynamic_variables: DynamicVariables },
    /// Keep-alive answer to a server `ping`
    Pong { event_id: u64 },
}

impl ClientMessage {
    pub fn initiation(dynamic_variables: DynamicVariables) -> Self {
        ClientMessage::ConversationInitiationClientData { dynamic_variables }
    }
}

/// Base64 PCM16LE microphone audio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAudioChunk {
    pub user_audio_chunk: String,
}

impl UserAudioChunk {
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            user_audio_chunk: base64::engine::general_purpose::STANDARD
                .encode(frame.to_pcm_bytes()),
        }
    }
}

/// PCM rate assumed when the agent does not announce its output format
pub const DEFAULT_AGENT_SAMPLE_RATE: u32 = 16000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiationMetadata {
    pub conversation_id: String,
    /// e.g. `pcm_16000`
    #[serde(default)]
    pub agent_output_audio_format: Option<String>,
}

impl InitiationMetadata {
    /// Sample rate of the agent's PCM audio, from `pcm_<rate>`
    pub fn output_sample_rate(&self) -> u32 {
        self.agent_output_audio_format
            .as_deref()
            .and_then(|format| format.strip_prefix("pcm_"))
            .and_then(|rate| rate.parse().ok())
            .unwrap_or(DEFAULT_AGENT_SAMPLE_RATE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTranscription {
    pub user_transcript: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingEvent {
    pub event_id: u64,
}

/// One chunk of the agent's voice, base64 PCM16LE mono
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAudio {
    pub audio_base_64: String,
    #[serde(default)]
    pub event_id: u64,
}

impl AgentAudio {
    pub fn to_frame(&self, sample_rate: u32) -> Result<AudioFrame, base64::DecodeError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(&self.audio_base_64)?;
        Ok(AudioFrame::from_pcm_bytes(&bytes, sample_rate, 1))
    }
}

/// Messages received from the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The agent accepted the session
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: InitiationMetadata,
    },
    /// What the agent heard the candidate say
    UserTranscript {
        user_transcription_event: UserTranscription,
    },
    /// What the agent said
    AgentResponse {
        agent_response_event: AgentResponse,
    },
    Ping {
        ping_event: PingEvent,
    },
    /// The agent's voice
    Audio {
        audio_event: AgentAudio,
    },
    /// The candidate spoke over the agent; queued agent audio is stale
    Interruption,
    Error {
        #[serde(default)]
        message: String,
    },
    /// Corrections, VAD scores and anything newer
    #[serde(other)]
    Other,
}
