//! HTTP streaming synthesis client
//!
//! POSTs the text and reads the chunked PCM16 response body as it arrives.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use voice_session_config::{TtsVendorConfig, VendorConfig};
use voice_session_core::{Error, Result, TextToSpeech};

#[derive(Debug, Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
    voice: &'a str,
    sample_rate: u32,
    encoding: &'static str,
}

/// Streaming TTS over HTTP
pub struct HttpTts {
    client: reqwest::Client,
    config: TtsVendorConfig,
}

impl HttpTts {
    pub fn new(vendors: &VendorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(vendors.connect_timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| Error::Config(format!("failed to build TTS client: {}", e)))?;

        Ok(Self {
            client,
            config: vendors.tts.clone(),
        })
    }
}

#[async_trait]
impl TextToSpeech for HttpTts {
    async fn stream(&self, text: &str, tx: mpsc::Sender<Bytes>) -> Result<()> {
        let body = SpeakRequest {
            text,
            voice: &self.config.voice,
            sample_rate: self.config.sample_rate,
            encoding: "linear16",
        };

        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.header("Authorization", format!("Token {}", key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("TTS connect: {}", e))
            } else {
                Error::Connection(format!("TTS request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Connection(format!("TTS error {}: {}", status, text)));
        }

        // Only whole samples are forwarded; an odd trailing byte waits for
        // the next body chunk.
        let mut carry = BytesMut::new();
        let mut body = response.bytes_stream();
        while let Some(next) = body.next().await {
            let bytes = next.map_err(|e| Error::Stream(format!("TTS body: {}", e)))?;
            carry.extend_from_slice(&bytes);

            let whole = carry.len() - carry.len() % 2;
            if whole == 0 {
                continue;
            }
            let chunk = carry.split_to(whole).freeze();
            if tx.send(chunk).await.is_err() {
                return Err(Error::Cancelled);
            }
        }

        if !carry.is_empty() {
            tracing::debug!(bytes = carry.len(), "Discarding partial sample at end of TTS stream");
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn name(&self) -> &str {
        "http-tts"
    }
}
