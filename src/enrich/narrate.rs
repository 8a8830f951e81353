use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{EnrichmentError, EnrichmentErrorKind, Stage};
use crate::storage::ArticleRecord;
use crate::util::truncate_chars;

#[async_trait]
pub trait Narrator: Send + Sync {
    /// Renders `text` to an audio file at `out`, creating parent directories.
    async fn narrate(&self, text: &str, out: &Path) -> Result<(), EnrichmentError>;
}

/// Deterministic audio location: `{audio_dir}/{type}/{date}/{sha256(url)[..16]}.wav`.
///
/// Re-running a day finds the same file, so narration is not repeated.
pub fn audio_path_for(audio_dir: &Path, record: &ArticleRecord) -> PathBuf {
    let digest = Sha256::digest(record.source_url.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    audio_dir
        .join(&record.newsletter_type)
        .join(record.publish_date.format("%Y-%m-%d").to_string())
        .join(format!("{hex}.wav"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    pub voice: String,
    /// Words per minute.
    pub rate: u32,
    /// 0.0 to 1.0.
    pub volume: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice: "en-us".to_string(),
            rate: 180,
            volume: 0.9,
        }
    }
}

/// Narrates by shelling out to an espeak-compatible TTS binary.
///
/// Invoked as `{program} -v {voice} -s {rate} -a {amplitude} -w {file} {text}`.
/// Output is written to a `.partial` sibling and renamed into place, so an
/// interrupted run never leaves a truncated file that would later be reused.
pub struct CommandNarrator {
    program: String,
    voice: VoiceSettings,
}

impl CommandNarrator {
    pub fn new(program: impl Into<String>, voice: VoiceSettings) -> Self {
        Self {
            program: program.into(),
            voice,
        }
    }

    fn error(kind: EnrichmentErrorKind, message: impl Into<String>) -> EnrichmentError {
        EnrichmentError::new(Stage::Narration, kind, message)
    }

    fn amplitude(&self) -> u32 {
        // espeak amplitude runs 0..=200, 100 being normal
        (self.voice.volume.clamp(0.0, 1.0) * 200.0).round() as u32
    }
}

#[async_trait]
impl Narrator for CommandNarrator {
    async fn narrate(&self, text: &str, out: &Path) -> Result<(), EnrichmentError> {
        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Self::error(
                    EnrichmentErrorKind::Transient,
                    format!("cannot create {}: {e}", parent.display()),
                )
            })?;
        }

        let partial = out.with_extension("wav.partial");
        let output = tokio::process::Command::new(&self.program)
            .arg("-v")
            .arg(&self.voice.voice)
            .arg("-s")
            .arg(self.voice.rate.to_string())
            .arg("-a")
            .arg(self.amplitude().to_string())
            .arg("-w")
            .arg(&partial)
            .arg(text)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Self::error(
                        EnrichmentErrorKind::Unsupported,
                        format!("TTS command '{}' not found", self.program),
                    )
                } else {
                    Self::error(EnrichmentErrorKind::Transient, e.to_string())
                }
            })?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&partial).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::error(
                EnrichmentErrorKind::Transient,
                format!(
                    "TTS exited with {}: {}",
                    output.status,
                    truncate_chars(stderr.trim(), 200)
                ),
            ));
        }

        tokio::fs::rename(&partial, out).await.map_err(|e| {
            Self::error(
                EnrichmentErrorKind::Transient,
                format!("cannot move audio into place: {e}"),
            )
        })?;

        tracing::debug!(path = %out.display(), "Narrated article");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(url: &str) -> ArticleRecord {
        ArticleRecord {
            source_url: url.to_string(),
            title: "t".to_string(),
            summary_raw: "s".to_string(),
            title_translated: None,
            summary_translated: None,
            audio_path: None,
            reading_time_minutes: None,
            position: 0,
            newsletter_type: "ai".to_string(),
            publish_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
        }
    }

    #[test]
    fn test_audio_path_layout() {
        let path = audio_path_for(Path::new("/data/audio"), &record("https://example.com/a"));
        let s = path.to_string_lossy();
        assert!(s.starts_with("/data/audio/ai/2024-03-05/"));
        assert!(s.ends_with(".wav"));
        let stem = path.file_stem().unwrap().to_string_lossy();
        assert_eq!(stem.len(), 16);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_audio_path_is_stable_per_url() {
        let dir = Path::new("audio");
        assert_eq!(
            audio_path_for(dir, &record("https://example.com/a")),
            audio_path_for(dir, &record("https://example.com/a"))
        );
        assert_ne!(
            audio_path_for(dir, &record("https://example.com/a")),
            audio_path_for(dir, &record("https://example.com/b"))
        );
    }

    #[test]
    fn test_amplitude_scaling() {
        let n = CommandNarrator::new(
            "espeak-ng",
            VoiceSettings {
                volume: 0.5,
                ..VoiceSettings::default()
            },
        );
        assert_eq!(n.amplitude(), 100);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unsupported() {
        let n = CommandNarrator::new("definitely-not-a-tts-binary-xyz", VoiceSettings::default());
        let out = std::env::temp_dir().join(format!("tldr-harvest-narrate-{}.wav", std::process::id()));
        let err = n.narrate("hello", &out).await.unwrap_err();
        assert_eq!(err.kind, EnrichmentErrorKind::Unsupported);
        assert_eq!(err.stage, Stage::Narration);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_transient() {
        // `false` ignores its arguments and exits 1
        let n = CommandNarrator::new("false", VoiceSettings::default());
        let out = std::env::temp_dir().join(format!("tldr-harvest-false-{}.wav", std::process::id()));
        let err = n.narrate("hello", &out).await.unwrap_err();
        assert_eq!(err.kind, EnrichmentErrorKind::Transient);
        assert!(!out.exists());
    }
}
