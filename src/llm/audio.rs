//! OpenAI speech synthesis and transcription.

use crate::config::{AudioConfig, Config};
use crate::error::AudioError;
use crate::llm::transport::{HttpSession, MAX_ERROR_BODY_BYTES, truncate_body};

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Voices accepted by the speech endpoint.
pub const VOICES: [&str; 10] = [
    "alloy", "ash", "ballad", "coral", "echo", "fable", "nova", "onyx", "sage", "shimmer",
];

/// One timestamped span of a transcription.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    segments: Vec<TranscriptSegment>,
}

/// Client for the OpenAI audio endpoints, sharing the bot's HTTP session.
#[derive(Clone)]
pub struct AudioClient {
    session: Arc<HttpSession>,
    config: AudioConfig,
    api_key: Option<String>,
    timeout: Duration,
}

impl AudioClient {
    pub fn new(session: Arc<HttpSession>, config: &Config) -> Self {
        Self {
            session,
            config: config.audio.clone(),
            api_key: config.openai.api_key.clone(),
            timeout: config.api_timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, AudioError> {
        self.api_key
            .as_deref()
            .ok_or(AudioError::NotConfigured("OpenAI API"))
    }

    fn client(&self) -> Result<Arc<reqwest::Client>, AudioError> {
        self.session
            .client()
            .map_err(|error| AudioError::Request(error.to_string()))
    }

    /// Synthesize `text` with `voice`, returning MP3 bytes.
    pub async fn speak(&self, text: &str, voice: &str) -> Result<Vec<u8>, AudioError> {
        let api_key = self.api_key()?;
        let body = serde_json::json!({
            "model": self.config.tts_model,
            "input": text,
            "voice": voice,
            "response_format": "mp3",
        });

        let response = self
            .client()?
            .post(&self.config.speech_url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|error| AudioError::Request(error.to_string()))?;

        let response = check_status(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|error| AudioError::Request(error.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Transcribe an audio file into timestamped segments.
    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<Vec<TranscriptSegment>, AudioError> {
        let api_key = self.api_key()?;

        let file = reqwest::multipart::Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str(content_type)
            .map_err(|error| AudioError::Request(error.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.config.transcription_model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        let response = self
            .client()?
            .post(&self.config.transcription_url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|error| AudioError::Request(error.to_string()))?;

        let response = check_status(response).await?;
        let text = response
            .text()
            .await
            .map_err(|error| AudioError::Request(error.to_string()))?;
        let parsed: VerboseTranscription = serde_json::from_str(&text)
            .map_err(|error| AudioError::InvalidResponse(error.to_string()))?;
        Ok(parsed.segments)
    }
}

impl std::fmt::Debug for AudioClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClient")
            .field("config", &self.config)
            .field("configured", &self.is_configured())
            .finish()
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AudioError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match response.text().await {
        Ok(text) => truncate_body(&text, MAX_ERROR_BODY_BYTES),
        Err(_) => "<unable to read response body>".to_string(),
    };
    tracing::error!(status = status.as_u16(), %body, "audio API request failed");
    Err(AudioError::Provider {
        status: status.as_u16(),
        body,
    })
}

/// Render segments as `[start - end] text` lines.
pub fn format_segments(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|segment| {
            format!(
                "[{:.2} - {:.2}] {}\n",
                segment.start,
                segment.end,
                segment.text.trim()
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer, api_key: Option<&str>) -> AudioClient {
        AudioClient {
            session: Arc::new(HttpSession::new().unwrap()),
            config: AudioConfig {
                speech_url: server.url("/audio/speech"),
                transcription_url: server.url("/audio/transcriptions"),
                tts_model: "tts".into(),
                transcription_model: "whisper".into(),
            },
            api_key: api_key.map(str::to_string),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn segments_render_with_timestamps() {
        let segments = vec![
            TranscriptSegment {
                start: 0.0,
                end: 1.5,
                text: " hello ".into(),
            },
            TranscriptSegment {
                start: 1.5,
                end: 3.25,
                text: "world".into(),
            },
        ];
        assert_eq!(
            format_segments(&segments),
            "[0.00 - 1.50] hello\n[1.50 - 3.25] world\n"
        );
    }

    #[tokio::test]
    async fn speak_returns_audio_bytes() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/audio/speech")
                    .header("authorization", "Bearer sk-test")
                    .json_body_includes(r#"{"voice": "nova"}"#);
                then.status(200).body("ID3fake");
            })
            .await;

        let client = client_for(&server, Some("sk-test"));
        let audio = client.speak("hi there", "nova").await.unwrap();

        assert_eq!(audio, b"ID3fake");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn transcribe_parses_segments() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/audio/transcriptions");
                then.status(200).json_body(json!({
                    "text": "hello world",
                    "segments": [{"id": 0, "start": 0.0, "end": 2.0, "text": "hello world"}]
                }));
            })
            .await;

        let client = client_for(&server, Some("sk-test"));
        let segments = client
            .transcribe(b"RIFF".to_vec(), "clip.wav", "audio/wav")
            .await
            .unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hello world");
    }

    #[tokio::test]
    async fn errors_carry_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/audio/speech");
                then.status(400).body("bad voice");
            })
            .await;

        let client = client_for(&server, Some("sk-test"));
        let error = client.speak("hi", "nobody").await.unwrap_err();
        assert!(matches!(error, AudioError::Provider { status: 400, ref body } if body == "bad voice"));

        let unconfigured = client_for(&server, None);
        assert!(matches!(
            unconfigured.speak("hi", "nova").await.unwrap_err(),
            AudioError::NotConfigured(_)
        ));
    }
}
