//! Stages shared by the workflows

use bytes::Bytes;
use std::path::{Path, PathBuf};

use super::PipelineContext;
use crate::error::{Error, Result};
use crate::generation::{classify_items, extract_items, ClassifyContext, ExtractionMode};
use crate::ingestion::text::bytes_to_text;
use crate::media::{self, AudioWindow};
use crate::processing::JobControl;
use crate::providers::{AudioClip, OcrRequest, ResilientClient};
use crate::types::{ClassifiedItem, DocumentKind, SourceDocument};

/// Last path component of an upload or archive entry name, safe to stage under
pub fn safe_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "file".to_string(),
        _ => cleaned,
    }
}

/// Duration of a staged video; too-small or unprobeable files fail
pub async fn validate_video(ctx: &PipelineContext, video: &Path, control: &JobControl) -> Result<f64> {
    let media = ctx.media.clone();
    let video = video.to_path_buf();
    control
        .guard(media::blocking(move || media.validate_video(&video)))
        .await
}

/// Extract, split and transcribe a video's audio; the transcript is staged next to it
pub async fn transcribe_video(
    ctx: &PipelineContext,
    client: &ResilientClient,
    video: &Path,
    window: AudioWindow,
    work_dir: &Path,
    control: &JobControl,
) -> Result<String> {
    let audio = work_dir.join("audio.mp3");
    {
        let media = ctx.media.clone();
        let (video, audio) = (video.to_path_buf(), audio.clone());
        control
            .guard(media::blocking(move || media.extract_audio(&video, &audio, window)))
            .await?;
    }

    let segments: Vec<PathBuf> = {
        let media = ctx.media.clone();
        let segment_secs = ctx.media.config().segment_secs;
        let (audio, out_dir) = (audio.clone(), work_dir.join("segments"));
        control
            .guard(media::blocking(move || media.split_audio(&audio, segment_secs, &out_dir)))
            .await?
    };

    let mut parts = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        let clip = AudioClip {
            filename: segment
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "audio.mp3".to_string()),
            data: Bytes::from(tokio::fs::read(segment).await?),
        };
        let text = client.transcribe(&clip, control).await?;
        tracing::debug!("Transcribed segment {}/{}", index + 1, segments.len());
        parts.push(text.trim().to_string());
    }

    let transcript = parts.join("\n").trim().to_string();
    if transcript.is_empty() {
        return Err(Error::media("No speech was transcribed"));
    }
    tokio::fs::write(work_dir.join("transcript.txt"), &transcript).await?;
    Ok(transcript)
}

/// Text of an uploaded document: read directly, or OCR for PDFs and images
pub async fn document_text(
    client: &ResilientClient,
    document: &SourceDocument,
    work_dir: &Path,
    control: &JobControl,
) -> Result<String> {
    let text = match document.kind {
        DocumentKind::Text => bytes_to_text(&document.data),
        DocumentKind::Pdf | DocumentKind::Image => {
            let request = OcrRequest {
                filename: document.filename.clone(),
                mime_type: document.mime_type(),
                data: Bytes::from(document.data.clone()),
            };
            client.ocr(&request, control).await?
        }
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(Error::InvalidInput(format!(
            "{} has no readable text",
            document.filename
        )));
    }

    let snapshot = work_dir.join(format!("{}.txt", safe_file_name(&document.filename)));
    tokio::fs::write(snapshot, &text).await?;
    Ok(text)
}

/// Chunked extraction followed by batch classification
///
/// Returns an empty list when the model finds no questions.
pub async fn extract_and_classify(
    ctx: &PipelineContext,
    client: &ResilientClient,
    text: &str,
    mode: ExtractionMode,
    classify: &ClassifyContext,
    control: &JobControl,
) -> Result<Vec<ClassifiedItem>> {
    let items = extract_items(client, &ctx.chunker, mode, &ctx.product, text, control).await?;
    if items.is_empty() {
        return Ok(Vec::new());
    }
    tracing::info!("Extracted {} unique question(s)", items.len());
    classify_items(client, items, ctx.batch_size, classify, control).await
}
