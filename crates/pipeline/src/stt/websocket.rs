//! Websocket streaming transcription client
//!
//! Binary frames carry PCM16 audio; a `{"type":"Finalize"}` text frame asks
//! the vendor to close out the current utterance. Results arrive as JSON
//! text frames, either flat (`{text, confidence, is_final}`) or in the
//! channel/alternatives layout used by most hosted recognizers.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use voice_session_config::{AudioConfig, SttVendorConfig};
use voice_session_core::{Error, Result, SpeechToText, SttCommand, SttConnection, SttVendorEvent};

/// Close code reported when the socket drops without a close frame
const ABNORMAL_CLOSE: u16 = 1006;
/// Close frame without a status code
const NO_STATUS: u16 = 1005;

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VendorMessage {
    Channel {
        channel: Channel,
        #[serde(default)]
        is_final: bool,
    },
    Flat {
        text: String,
        #[serde(default)]
        confidence: f32,
        #[serde(default)]
        is_final: bool,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Deserialize)]
struct Channel {
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

fn parse_message(text: &str) -> Option<SttVendorEvent> {
    match serde_json::from_str::<VendorMessage>(text) {
        Ok(VendorMessage::Channel { channel, is_final }) => {
            let best = channel.alternatives.into_iter().next()?;
            Some(SttVendorEvent::Transcript {
                text: best.transcript,
                confidence: best.confidence,
                is_final,
            })
        }
        Ok(VendorMessage::Flat {
            text,
            confidence,
            is_final,
        }) => Some(SttVendorEvent::Transcript {
            text,
            confidence,
            is_final,
        }),
        Ok(VendorMessage::Error { error }) => Some(SttVendorEvent::Error(error)),
        Err(_) => {
            tracing::trace!(message = text, "Ignoring unrecognized STT message");
            None
        }
    }
}

/// Streaming STT over a websocket
pub struct WebSocketStt {
    config: SttVendorConfig,
    sample_rate: u32,
    channels: u16,
}

impl WebSocketStt {
    pub fn new(config: SttVendorConfig, audio: &AudioConfig) -> Self {
        Self {
            config,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
        }
    }

    fn endpoint(&self) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.config.url)
            .map_err(|e| Error::Config(format!("invalid STT url {}: {}", self.config.url, e)))?;
        url.query_pairs_mut()
            .append_pair("encoding", "linear16")
            .append_pair("sample_rate", &self.sample_rate.to_string())
            .append_pair("channels", &self.channels.to_string())
            .append_pair("language", &self.config.language)
            .append_pair("interim_results", "true");
        Ok(url.into())
    }
}

#[async_trait]
impl SpeechToText for WebSocketStt {
    async fn connect(&self) -> Result<SttConnection> {
        let endpoint = self.endpoint()?;
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Config(format!("invalid STT request: {}", e)))?;

        if let Some(ref key) = self.config.api_key {
            let value = HeaderValue::from_str(&format!("Token {}", key))
                .map_err(|e| Error::Config(format!("invalid STT api key: {}", e)))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| Error::Connection(format!("STT handshake failed: {}", e)))?;
        tracing::debug!(url = %self.config.url, "STT websocket connected");

        let (mut sink, mut stream) = socket.split();
        let (command_tx, mut command_rx) = mpsc::channel::<SttCommand>(COMMAND_QUEUE);
        let (event_tx, event_rx) = mpsc::channel::<SttVendorEvent>(EVENT_QUEUE);

        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let message = match command {
                    SttCommand::Audio(audio) => Message::Binary(audio.to_vec()),
                    SttCommand::Finalize => Message::Text(r#"{"type":"Finalize"}"#.to_string()),
                    SttCommand::Close => break,
                };
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(error = %e, "STT websocket write failed");
                    return;
                }
            }
            let close = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            let _ = sink.send(Message::Close(Some(close))).await;
        });

        tokio::spawn(async move {
            let closed = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_message(&text) {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((NO_STATUS, String::new()));
                        break SttVendorEvent::Closed { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break SttVendorEvent::Closed {
                            code: ABNORMAL_CLOSE,
                            reason: e.to_string(),
                        }
                    }
                    None => {
                        break SttVendorEvent::Closed {
                            code: ABNORMAL_CLOSE,
                            reason: "stream ended".to_string(),
                        }
                    }
                }
            };
            if closed.is_abnormal_close() {
                tracing::warn!(event = ?closed, "STT websocket closed abnormally");
            } else {
                tracing::debug!("STT websocket closed normally");
            }
            let _ = event_tx.send(closed).await;
        });

        Ok(SttConnection {
            commands: command_tx,
            events: event_rx,
        })
    }

    fn name(&self) -> &str {
        "websocket-stt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_transcript() {
        let event = parse_message(r#"{"text":"hello","confidence":0.9,"is_final":true}"#);
        assert_eq!(
            event,
            Some(SttVendorEvent::Transcript {
                text: "hello".into(),
                confidence: 0.9,
                is_final: true,
            })
        );
    }

    #[test]
    fn test_parse_channel_transcript() {
        let raw = r#"{"is_final":false,"channel":{"alternatives":[{"transcript":"refill my","confidence":0.71}]}}"#;
        match parse_message(raw) {
            Some(SttVendorEvent::Transcript { text, is_final, .. }) => {
                assert_eq!(text, "refill my");
                assert!(!is_final);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_and_metadata() {
        assert_eq!(
            parse_message(r#"{"error":"quota exceeded"}"#),
            Some(SttVendorEvent::Error("quota exceeded".into()))
        );
        assert_eq!(parse_message(r#"{"type":"Metadata","request_id":"x"}"#), None);
        assert_eq!(parse_message("not json"), None);
    }

    #[test]
    fn test_endpoint_query() {
        let stt = WebSocketStt::new(SttVendorConfig::default(), &AudioConfig::default());
        let endpoint = stt.endpoint().unwrap();
        assert!(endpoint.contains("encoding=linear16"));
        assert!(endpoint.contains("sample_rate=16000"));
        assert!(endpoint.contains("channels=1"));
    }
}
