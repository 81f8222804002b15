//! Realtime agent over a WebSocket
//!
//! # Connection Flow
//!
//! 1. Handshake with `{url}?agent_id=<id>`
//! 2. Send `conversation_initiation_client_data` carrying the dynamic variables
//! 3. Wait for `conversation_initiation_metadata`, then report `connected`
//! 4. Background tasks read agent messages and pump microphone audio; agent
//!    audio goes to the playback sink, if one is attached
//! 5. `close()` sends a close frame and waits for the reader to finish
//!
//! No retries: a failed open is reported to the controller as is.

use super::client::{ConversationClient, ConversationError, ConversationEvents, SessionOpenPayload};
use super::protocol::{ClientMessage, InitiationMetadata, ServerMessage, UserAudioChunk};
use crate::audio::{AudioFrame, AudioPlayback};
use crate::config::AgentConfig;
use crate::session::transcript::Message;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// How long `close()` waits for the agent to acknowledge the close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

struct ActiveConversation {
    conversation_id: String,
    writer: Arc<Mutex<WsSink>>,
    reader: JoinHandle<()>,
    uplink: Option<JoinHandle<()>>,
    events: ConversationEvents,
}

pub struct WebSocketConversationClient {
    url: String,
    api_key: Option<String>,
    connect_timeout: Duration,
    playback: Option<Arc<dyn AudioPlayback>>,
    active: Mutex<Option<ActiveConversation>>,
}

impl WebSocketConversationClient {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            playback: None,
            active: Mutex::new(None),
        }
    }

    /// Send the agent's voice to `playback`
    pub fn with_playback(mut self, playback: Arc<dyn AudioPlayback>) -> Self {
        self.playback = Some(playback);
        self
    }

    fn session_url(&self, agent_id: &str) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}agent_id={}", self.url, separator, agent_id)
    }

    async fn connect(&self, agent_id: &str) -> Result<WsStream, ConversationError> {
        let mut request = self
            .session_url(agent_id)
            .into_client_request()
            .map_err(|e| ConversationError::Connect(e.to_string()))?;

        if let Some(key) = &self.api_key {
            request.headers_mut().insert(
                "Authorization",
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| ConversationError::Connect(e.to_string()))?,
            );
        }

        info!("Connecting to agent at {}", self.url);

        let (ws_stream, _response) = timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| ConversationError::Connect("connection timeout".to_string()))?
            .map_err(|e| ConversationError::Connect(e.to_string()))?;

        Ok(ws_stream)
    }

    /// Send the initiation message and wait for the agent to confirm the session
    async fn initiate(
        &self,
        write: &mut WsSink,
        read: &mut SplitStream<WsStream>,
        payload: &SessionOpenPayload,
    ) -> Result<InitiationMetadata, ConversationError> {
        let initiation = ClientMessage::initiation(payload.variables.clone());
        send_json(write, &initiation)
            .await
            .map_err(ConversationError::Connect)?;

        let wait = async {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::ConversationInitiationMetadata {
                            conversation_initiation_metadata_event,
                        }) => return Ok(conversation_initiation_metadata_event),
                        Ok(ServerMessage::Error { message }) => {
                            return Err(ConversationError::Connect(message));
                        }
                        Ok(ServerMessage::Ping { ping_event }) => {
                            let pong = ClientMessage::Pong {
                                event_id: ping_event.event_id,
                            };
                            send_json(write, &pong)
                                .await
                                .map_err(ConversationError::Connect)?;
                        }
                        Ok(_) => debug!("Ignoring agent message while waiting for session"),
                        Err(e) => warn!("Failed to parse agent message: {}", e),
                    },
                    Ok(WsMessage::Close(_)) => {
                        return Err(ConversationError::Closed(
                            "agent closed before confirming the session".to_string(),
                        ));
                    }
                    Ok(_) => {} // ping/pong/binary frames
                    Err(e) => return Err(ConversationError::Protocol(e.to_string())),
                }
            }
            Err(ConversationError::Closed("stream ended".to_string()))
        };

        timeout(self.connect_timeout, wait)
            .await
            .map_err(|_| ConversationError::Connect("session confirmation timeout".to_string()))?
    }
}

#[async_trait::async_trait]
impl ConversationClient for WebSocketConversationClient {
    async fn open(
        &self,
        payload: SessionOpenPayload,
        uplink: Option<mpsc::Receiver<AudioFrame>>,
        events: ConversationEvents,
    ) -> Result<(), ConversationError> {
        if self.active.lock().await.is_some() {
            return Err(ConversationError::Connect(
                "a conversation is already open".to_string(),
            ));
        }

        let ws_stream = self.connect(&payload.agent_identifier).await?;
        let (mut write, mut read) = ws_stream.split();

        let metadata = self.initiate(&mut write, &mut read, &payload).await?;
        let output_rate = metadata.output_sample_rate();
        let conversation_id = metadata.conversation_id;
        info!(
            "Agent session started: {} (agent audio at {} Hz)",
            conversation_id, output_rate
        );

        // Report connected before the reader can post any message
        let mut active = self.active.lock().await;
        events.connected();

        let writer = Arc::new(Mutex::new(write));
        let speaker = self.playback.clone().map(|sink| AgentSpeaker { sink, output_rate });
        let reader = tokio::spawn(read_agent(
            read,
            Arc::clone(&writer),
            events.clone(),
            speaker,
        ));
        let uplink = uplink.map(|frames| tokio::spawn(pump_audio(frames, Arc::clone(&writer))));

        *active = Some(ActiveConversation {
            conversation_id,
            writer,
            reader,
            uplink,
            events,
        });

        Ok(())
    }

    async fn close(&self) {
        let Some(mut active) = self.active.lock().await.take() else {
            debug!("No agent session to close");
            return;
        };

        info!("Closing agent session {}", active.conversation_id);

        if let Some(uplink) = active.uplink.take() {
            uplink.abort();
        }

        if let Err(e) = active.writer.lock().await.close().await {
            warn!("Error closing agent WebSocket: {}", e);
        }

        if timeout(CLOSE_TIMEOUT, &mut active.reader).await.is_err() {
            warn!("Agent did not acknowledge close; dropping connection");
            active.reader.abort();
            active.events.disconnected();
        }

        if let Some(playback) = &self.playback {
            playback.interrupt();
        }
    }
}

async fn send_json<T: serde::Serialize>(write: &mut WsSink, message: &T) -> Result<(), String> {
    let json = serde_json::to_string(message).map_err(|e| e.to_string())?;
    write
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| e.to_string())
}

/// Playback sink plus the rate the agent announced for its audio
struct AgentSpeaker {
    sink: Arc<dyn AudioPlayback>,
    output_rate: u32,
}

/// Translate agent frames into controller events until the stream ends
async fn read_agent(
    mut read: SplitStream<WsStream>,
    writer: Arc<Mutex<WsSink>>,
    events: ConversationEvents,
    speaker: Option<AgentSpeaker>,
) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::UserTranscript {
                    user_transcription_event,
                }) => {
                    events.message(Message::candidate(user_transcription_event.user_transcript));
                }
                Ok(ServerMessage::AgentResponse {
                    agent_response_event,
                }) => {
                    events.message(Message::agent(agent_response_event.agent_response));
                }
                Ok(ServerMessage::Ping { ping_event }) => {
                    let pong = ClientMessage::Pong {
                        event_id: ping_event.event_id,
                    };
                    if let Err(e) = send_json(&mut *writer.lock().await, &pong).await {
                        warn!("Failed to answer agent ping: {}", e);
                    }
                }
                Ok(ServerMessage::Audio { audio_event }) => {
                    let Some(speaker) = &speaker else { continue };
                    match audio_event.to_frame(speaker.output_rate) {
                        Ok(frame) => speaker.sink.play(frame),
                        Err(e) => warn!("Discarding undecodable agent audio: {}", e),
                    }
                }
                Ok(ServerMessage::Interruption) => {
                    debug!("Agent interrupted by the candidate");
                    if let Some(speaker) = &speaker {
                        speaker.sink.interrupt();
                    }
                }
                Ok(ServerMessage::Error { message }) => {
                    warn!("Agent reported an error: {}", message);
                    events.error(message);
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to parse agent message: {}", e),
            },
            Ok(WsMessage::Close(_)) => {
                info!("Agent closed the session");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Agent WebSocket error: {}", e);
                events.error(e.to_string());
                break;
            }
        }
    }

    events.disconnected();
}

/// Forward microphone frames as base64 PCM chunks
async fn pump_audio(mut frames: mpsc::Receiver<AudioFrame>, writer: Arc<Mutex<WsSink>>) {
    while let Some(frame) = frames.recv().await {
        let chunk = UserAudioChunk::from_frame(&frame);
        if let Err(e) = send_json(&mut *writer.lock().await, &chunk).await {
            warn!("Failed to send microphone audio: {}", e);
            break;
        }
    }
    debug!("Microphone pump stopped");
}
