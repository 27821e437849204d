//! Workflows driven end to end through the job manager with in-memory collaborators

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use intake_pipeline::config::{AppConfig, SinkBackend};
use intake_pipeline::error::{Error, ProviderError, Result};
use intake_pipeline::media::MediaToolkit;
use intake_pipeline::pipelines::assessment::{
    self, AssessmentFilesRequest, AssessmentMetadata, UploadedDocument,
};
use intake_pipeline::pipelines::assignment::{self, AssignmentRequest, AssignmentRow};
use intake_pipeline::pipelines::drilldown::{self, DrilldownRequest, DrilldownRow};
use intake_pipeline::pipelines::{PipelineServices, WorkflowOptions};
use intake_pipeline::processing::{
    JobControl, JobManager, JobSnapshot, JobState, JobStore, Progress,
};
use intake_pipeline::providers::{
    AudioClip, BackendFactory, ChatRequest, LlmBackend, MemorySink, OcrRequest,
    ProviderRuntimeConfig, RemoteFetcher, SheetTarget, ThrottleRegistry,
};

/// Answers extraction with one question per page and classifies everything as conceptual
struct ScriptedBackend {
    keys_seen: Mutex<Vec<String>>,
    ocr_files: Mutex<Vec<String>>,
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn chat(&self, api_key: &str, request: &ChatRequest) -> std::result::Result<String, ProviderError> {
        self.keys_seen.lock().push(api_key.to_string());
        let system = request.system.as_deref().unwrap_or_default();
        if system.starts_with("You classify") {
            return Ok(r#"{"classifications": [
                {"question": "What is ownership?", "question_type": "conceptual",
                 "concept": "ownership", "difficulty": "Easy", "topic": "Memory",
                 "sub_topic": "n/a", "relevancy": "high", "curriculum_coverage": "covered"}
            ]}"#
            .to_string());
        }
        Ok("```json\n{\"questions\": [{\"question\": \"What is ownership?\", \"answer\": \"A model\"}]}\n```".to_string())
    }

    async fn ocr(&self, _api_key: &str, request: &OcrRequest) -> std::result::Result<String, ProviderError> {
        self.ocr_files.lock().push(request.filename.clone());
        Ok("Quiz 1\n1. What is ownership?".to_string())
    }

    async fn transcribe(&self, _api_key: &str, _clip: &AudioClip) -> std::result::Result<String, ProviderError> {
        Ok(String::new())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedFactory(Arc<ScriptedBackend>);

impl BackendFactory for ScriptedFactory {
    fn build(&self, _runtime: &ProviderRuntimeConfig) -> Result<Arc<dyn LlmBackend>> {
        Ok(self.0.clone())
    }
}

/// Serves page text; links containing "missing" fail, "hang" waits for cancellation
/// and "gate" waits for the test to open the gate
struct PageFetcher {
    gate: Arc<Notify>,
}

#[async_trait]
impl RemoteFetcher for PageFetcher {
    async fn download(&self, link: &str, _dest: &Path, _control: &JobControl) -> Result<u64> {
        Err(Error::fetch(link, "downloads are not served here"))
    }

    async fn download_authenticated(&self, link: &str, dest: &Path, control: &JobControl) -> Result<u64> {
        self.download(link, dest, control).await
    }

    async fn fetch_text(&self, link: &str, control: &JobControl) -> Result<String> {
        if link.contains("missing") {
            return Err(Error::fetch(link, "HTTP 404"));
        }
        if link.contains("hang") {
            control.cancelled().await;
            return Err(Error::Cancelled);
        }
        if link.contains("gate") {
            self.gate.notified().await;
        }
        Ok(format!("Assignment at {}\n1. What is ownership?\n", link))
    }
}

struct Harness {
    manager: JobManager,
    services: Arc<PipelineServices>,
    sink: Arc<MemorySink>,
    backend: Arc<ScriptedBackend>,
    gate: Arc<Notify>,
    _work_dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let work_dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.sink.backend = SinkBackend::Memory;
    config.media.work_dir = work_dir.path().to_path_buf();
    config.retry.min_interval_ms = 0;

    let sink = Arc::new(MemorySink::new());
    let backend = Arc::new(ScriptedBackend {
        keys_seen: Mutex::new(Vec::new()),
        ocr_files: Mutex::new(Vec::new()),
    });
    let gate = Arc::new(Notify::new());
    let services = Arc::new(PipelineServices {
        media: MediaToolkit::new(config.media.clone()),
        config: Arc::new(config),
        sink: sink.clone(),
        fetcher: Arc::new(PageFetcher { gate: gate.clone() }),
        backends: Arc::new(ScriptedFactory(backend.clone())),
        throttles: Arc::new(ThrottleRegistry::new()),
    });

    Harness {
        manager: JobManager::new(Arc::new(JobStore::new()), Duration::from_secs(3600)),
        services,
        sink,
        backend,
        gate,
        _work_dir: work_dir,
    }
}

fn options(keys: &[&str]) -> WorkflowOptions {
    WorkflowOptions {
        product: "Rust".to_string(),
        provider: Some("openai".to_string()),
        api_keys: keys.iter().map(|k| k.to_string()).collect(),
        ..Default::default()
    }
}

async fn wait_terminal(manager: &JobManager, id: Uuid) -> JobSnapshot {
    for _ in 0..1000 {
        if let Some(snapshot) = manager.get_job(id) {
            if snapshot.state.is_terminal() {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never reached a terminal state", id);
}

fn assignment_request(links: &[&str]) -> AssignmentRequest {
    AssignmentRequest {
        options: options(&["key-a"]),
        syllabus: Some("Ownership and borrowing".to_string()),
        rows: links
            .iter()
            .enumerate()
            .map(|(i, link)| AssignmentRow {
                assignment_name: format!("Week {}", i + 1),
                link: link.to_string(),
            })
            .collect(),
    }
}

#[tokio::test]
async fn test_assignment_skips_failed_row_and_writes_the_rest() {
    let h = harness();
    let request = assignment_request(&["https://example.com/week1", "https://example.com/missing"]);
    let services = h.services.clone();
    let job = h
        .manager
        .create_job("assignment", move |handle| assignment::run(services, request, handle));

    let snapshot = wait_terminal(&h.manager, job.id).await;
    assert_eq!(snapshot.state, JobState::Success, "{:?}", snapshot.error);

    let result = snapshot.result.unwrap();
    assert_eq!(result["rowsWritten"], 1);
    assert_eq!(result["itemsSucceeded"], 1);
    let skipped = result["skipped"].as_array().unwrap();
    assert_eq!(skipped.len(), 1);
    assert!(skipped[0]["item"].as_str().unwrap().starts_with("row 2"));

    let target = SheetTarget::new("memory", "assignment");
    let header = h.sink.header(&target).unwrap();
    assert_eq!(header[0], "Assignment Name");

    let rows = h.sink.rows(&target);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.len(), header.len());
    assert_eq!(row[0], "Week 1");
    assert_eq!(row[1], "https://example.com/week1");
    assert_eq!(row[2], "Rust");
    assert_eq!(row[3], "What is ownership?");
    assert_eq!(row[4], "CONCEPTUAL");
    assert_eq!(row[7], "MEMORY");
    assert_eq!(row[8], "N/A");
    assert_eq!(row[10], "COVERED");

    // the failed row keeps its staging for inspection
    let staging = h.services.config.media.work_dir.join(format!("job-{}", job.id));
    assert!(staging.join("item-002").exists());
    assert!(!staging.join("item-001").exists());
}

#[tokio::test]
async fn test_assignment_with_no_rows_written_fails() {
    let h = harness();
    let request = assignment_request(&["https://example.com/missing-1", "https://example.com/missing-2"]);
    let services = h.services.clone();
    let job = h
        .manager
        .create_job("assignment", move |handle| assignment::run(services, request, handle));

    let snapshot = wait_terminal(&h.manager, job.id).await;
    assert_eq!(snapshot.state, JobState::Error);
    assert!(snapshot.error.unwrap().contains("HTTP 404"));
    assert!(h.sink.rows(&SheetTarget::new("memory", "assignment")).is_empty());
}

#[tokio::test]
async fn test_cancel_stops_a_running_job() {
    let h = harness();
    let request = assignment_request(&["https://example.com/hang", "https://example.com/week2"]);
    let services = h.services.clone();
    let job = h
        .manager
        .create_job("assignment", move |handle| assignment::run(services, request, handle));

    for _ in 0..200 {
        if h.manager.get_job(job.id).map(|s| s.state) == Some(JobState::Running) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let cancelled = h.manager.cancel_job(job.id).unwrap();
    assert!(cancelled.cancel_requested);

    let snapshot = wait_terminal(&h.manager, job.id).await;
    assert_eq!(snapshot.state, JobState::Cancelled);
    assert!(h.sink.rows(&SheetTarget::new("memory", "assignment")).is_empty());
}

#[tokio::test]
async fn test_drilldown_workers_pin_their_own_keys() {
    let h = harness();
    let request = DrilldownRequest {
        options: options(&["key-a", "key-b", "key-c"]),
        rows: (1..=4)
            .map(|i| DrilldownRow {
                candidate_name: format!("Candidate {}", i),
                round: "Round 1".to_string(),
                transcript_link: format!("https://example.com/transcript-{}", i),
            })
            .collect(),
    };
    let services = h.services.clone();
    let job = h
        .manager
        .create_job("drilldown", move |handle| drilldown::run(services, request, handle));

    let snapshot = wait_terminal(&h.manager, job.id).await;
    assert_eq!(snapshot.state, JobState::Success, "{:?}", snapshot.error);
    assert_eq!(snapshot.result.unwrap()["rowsWritten"], 4);

    let rows = h.sink.rows(&SheetTarget::new("memory", "drilldown"));
    let mut candidates: Vec<_> = rows.iter().map(|r| r[0].clone()).collect();
    candidates.sort();
    assert_eq!(
        candidates,
        vec!["Candidate 1", "Candidate 2", "Candidate 3", "Candidate 4"]
    );

    let keys = h.backend.keys_seen.lock().clone();
    for key in ["key-a", "key-b", "key-c"] {
        assert!(keys.iter().any(|k| k == key), "{} never used", key);
    }
}

#[tokio::test]
async fn test_partial_result_and_progress_follow_each_item() {
    let h = harness();
    let request = assignment_request(&[
        "https://example.com/week1",
        "https://example.com/gate",
        "https://example.com/missing",
    ]);
    let services = h.services.clone();
    let job = h
        .manager
        .create_job("assignment", move |handle| assignment::run(services, request, handle));

    // the second row holds until the gate opens
    let mut mid = None;
    for _ in 0..400 {
        let snapshot = h.manager.get_job(job.id).unwrap();
        if snapshot.progress.map(|p| p.completed) == Some(1) {
            mid = Some(snapshot);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mid = mid.expect("first row never completed");
    assert_eq!(mid.state, JobState::Running);
    assert_eq!(mid.progress, Some(Progress::new(1, 3)));
    let partial = mid.partial_result.unwrap();
    assert_eq!(partial["rowsWritten"], 1);
    assert_eq!(partial["rows"][0][0], "Week 1");
    assert_eq!(h.sink.rows(&SheetTarget::new("memory", "assignment")).len(), 1);

    h.gate.notify_one();
    let snapshot = wait_terminal(&h.manager, job.id).await;
    assert_eq!(snapshot.state, JobState::Success, "{:?}", snapshot.error);
    assert_eq!(snapshot.progress, Some(Progress::new(3, 3)));

    let partial = snapshot.partial_result.unwrap();
    assert_eq!(partial["rowsWritten"], 2);
    assert_eq!(partial["skipped"].as_array().map(Vec::len), Some(1));
    assert_eq!(snapshot.result.unwrap()["rowsWritten"], 2);
}

#[tokio::test]
async fn test_individual_assessment_reads_images_and_skips_unsupported_files() {
    let h = harness();
    let request = AssessmentFilesRequest {
        metadata: AssessmentMetadata {
            options: options(&["key-a"]),
            ..Default::default()
        },
        files: vec![
            UploadedDocument {
                filename: "quiz.png".to_string(),
                data: bytes::Bytes::from_static(b"\x89PNG"),
            },
            UploadedDocument {
                filename: "notes.docx".to_string(),
                data: bytes::Bytes::from_static(b"PK"),
            },
        ],
    };
    let services = h.services.clone();
    let job = h.manager.create_job("assessment_individual", move |handle| {
        assessment::run_individual(services, request, handle)
    });

    let snapshot = wait_terminal(&h.manager, job.id).await;
    assert_eq!(snapshot.state, JobState::Success, "{:?}", snapshot.error);
    assert_eq!(h.backend.ocr_files.lock().clone(), vec!["quiz.png"]);

    let result = snapshot.result.unwrap();
    assert_eq!(result["rowsWritten"], 1);
    let skipped = result["skipped"].as_array().unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0]["item"], "notes.docx");

    let rows = h.sink.rows(&SheetTarget::new("memory", "assessment_individual"));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], "quiz");
    assert_eq!(rows[0][1], "quiz.png");
    assert_eq!(rows[0][3], "What is ownership?");
    assert_eq!(rows[0][4], "A model");
    assert_eq!(rows[0][5], "CONCEPTUAL");
    assert_eq!(rows[0][11], "COVERED");
}
