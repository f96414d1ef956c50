use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use super::TranscribeError;
use crate::config::AudioConfig;

const SPEECH_API: &str = "https://speech.googleapis.com/v1/speech:recognize";
const SAMPLE_RATE: u32 = 16_000;

/// Convert any audio file into mono 16-bit PCM WAV at [`SAMPLE_RATE`].
pub async fn convert_to_wav(ffmpeg: &str, input: &Path, output: &Path) -> Result<(), TranscribeError> {
    let result = Command::new(ffmpeg)
        .args(["-y", "-loglevel", "error", "-i"])
        .arg(input)
        .args(["-ac", "1", "-ar", "16000", "-sample_fmt", "s16"])
        .arg(output)
        .output()
        .await?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(TranscribeError::Conversion(format!(
            "{ffmpeg} exited with {}: {}",
            result.status,
            stderr.trim()
        )));
    }

    Ok(())
}

#[derive(Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Google Cloud Speech-to-Text, synchronous recognition.
pub struct GoogleSpeech {
    http: Client,
    api_key: String,
}

impl GoogleSpeech {
    pub fn new(http: Client, api_key: String) -> Self {
        Self { http, api_key }
    }

    pub async fn transcribe(&self, wav: &Path, language_code: &str) -> Result<String, TranscribeError> {
        let audio = tokio::fs::read(wav).await?;
        let body = json!({
            "config": {
                "encoding": "LINEAR16",
                "sampleRateHertz": SAMPLE_RATE,
                "languageCode": language_code,
            },
            "audio": {
                "content": STANDARD.encode(&audio),
            },
        });

        let resp = self
            .http
            .post(SPEECH_API)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let message = match resp.json::<ApiErrorResponse>().await {
                Ok(error) => error.error.message,
                Err(_) => status.to_string(),
            };
            return Err(TranscribeError::Service(message));
        }

        let response: RecognizeResponse = resp.json().await?;
        debug!("Speech API returned {} result(s)", response.results.len());
        join_results(response)
    }
}

fn join_results(response: RecognizeResponse) -> Result<String, TranscribeError> {
    let text = response
        .results
        .into_iter()
        .filter_map(|result| result.alternatives.into_iter().next())
        .map(|alternative| alternative.transcript.trim().to_owned())
        .filter(|transcript| !transcript.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if text.is_empty() {
        Err(TranscribeError::NoSpeech)
    } else {
        Ok(text)
    }
}

/// An external recognizer run on the converted WAV file.
pub struct LocalCommand {
    program: String,
    args: Vec<String>,
    languages: Vec<String>,
}

impl LocalCommand {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            program: config.local_program.clone(),
            args: config.local_args.clone(),
            languages: config.local_languages.clone(),
        }
    }

    pub async fn transcribe(&self, wav: &Path, language_code: &str) -> Result<String, TranscribeError> {
        if !self.languages.iter().any(|language| language == language_code) {
            return Err(TranscribeError::UnsupportedLanguage {
                supported: self.languages.join(", "),
            });
        }

        let input = wav.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{input}", &input))
            .collect();

        debug!("Running {} {:?}", self.program, args);
        let result = Command::new(&self.program).args(&args).output().await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(TranscribeError::Service(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }

        parse_local_output(&String::from_utf8_lossy(&result.stdout))
    }
}

/// Recognizers either print plain text or a JSON object with a `text` field.
fn parse_local_output(stdout: &str) -> Result<String, TranscribeError> {
    let stdout = stdout.trim();

    let text = match serde_json::from_str::<serde_json::Value>(stdout) {
        Ok(value) => value
            .get("text")
            .and_then(|text| text.as_str())
            .unwrap_or_default()
            .trim()
            .to_owned(),
        Err(_) => stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
    };

    if text.is_empty() {
        Err(TranscribeError::NoSpeech)
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn google_results_are_joined() {
        let response: RecognizeResponse = serde_json::from_str(
            r#"{"results": [
                {"alternatives": [{"transcript": "bonjour ", "confidence": 0.9}]},
                {"alternatives": []},
                {"alternatives": [{"transcript": "tout le monde"}, {"transcript": "ignored"}]}
            ]}"#,
        )
        .unwrap();

        assert_eq!(join_results(response).unwrap(), "bonjour tout le monde");
    }

    #[test]
    fn empty_google_response_means_no_speech() {
        let response: RecognizeResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(join_results(response), Err(TranscribeError::NoSpeech)));
    }

    #[test]
    fn local_output_accepts_json_or_text() {
        assert_eq!(
            parse_local_output(r#"{"text": "salut"}"#).unwrap(),
            "salut"
        );
        assert_eq!(
            parse_local_output("salut\n\nça va\n").unwrap(),
            "salut ça va"
        );
        assert!(matches!(
            parse_local_output(r#"{"text": ""}"#),
            Err(TranscribeError::NoSpeech)
        ));
    }

    #[tokio::test]
    async fn local_rejects_unsupported_languages() {
        let local = LocalCommand::new(&AudioConfig::default());
        let result = local.transcribe(Path::new("/nonexistent.wav"), "en-US").await;

        assert!(matches!(
            result,
            Err(TranscribeError::UnsupportedLanguage { supported }) if supported == "fr-FR"
        ));
    }
}
