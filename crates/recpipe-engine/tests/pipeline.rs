//! End-to-end pipeline scenarios over in-memory fakes.
//!
//! The fakes implement the two capability ports, so these tests exercise
//! the real orchestrators, Status Store, users file, and audit trail with
//! no HTTP involved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use recpipe_core::config::PipelineConfig;
use recpipe_core::domain::{ApiError, Recording};
use recpipe_core::ports::{
    DownloadOutcome, DownloadRequest, ObjectStore, ProgressCallback, RecordingSource, RemoteEntry,
    StoreRoot,
};
use recpipe_engine::{MigrationRun, RunOptions, UserProcessor};
use recpipe_state::{ActiveUsersFile, StatusStore};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fake upstream
// ============================================================================

struct FakeSource {
    recordings: Vec<Recording>,
    bodies: HashMap<String, Vec<u8>>,
    download_calls: AtomicU64,
}

impl FakeSource {
    fn new(recordings: Vec<Recording>, bodies: HashMap<String, Vec<u8>>) -> Self {
        Self {
            recordings,
            bodies,
            download_calls: AtomicU64::new(0),
        }
    }

    fn downloads(&self) -> u64 {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordingSource for FakeSource {
    async fn list_all_recordings(
        &self,
        _cancel: &CancellationToken,
        _user_email: &str,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<Vec<Recording>, ApiError> {
        Ok(self.recordings.clone())
    }

    async fn get_meeting_recordings(
        &self,
        _cancel: &CancellationToken,
        meeting_uuid: &str,
    ) -> Result<Recording, ApiError> {
        let mut detail = self
            .recordings
            .iter()
            .find(|r| r.uuid == meeting_uuid)
            .cloned()
            .ok_or_else(|| ApiError::Client {
                status: 404,
                message: format!("no meeting {meeting_uuid}"),
            })?;
        detail.download_access_token = Some("dl-tok".into());
        Ok(detail)
    }

    async fn download_stream(
        &self,
        _cancel: &CancellationToken,
        request: DownloadRequest,
        _on_progress: Option<ProgressCallback>,
    ) -> DownloadOutcome {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        match self.bodies.get(&request.url) {
            Some(bytes) => {
                if let Some(parent) = request.destination.parent() {
                    tokio::fs::create_dir_all(parent).await.unwrap();
                }
                tokio::fs::write(&request.destination, bytes).await.unwrap();
                DownloadOutcome {
                    bytes_downloaded: bytes.len() as u64,
                    duration: std::time::Duration::from_millis(5),
                    average_speed_bps: 0.0,
                    resumed: false,
                    retry_count: 0,
                    success: true,
                    error: None,
                }
            }
            None => DownloadOutcome {
                bytes_downloaded: 0,
                duration: std::time::Duration::from_millis(1),
                average_speed_bps: 0.0,
                resumed: false,
                retry_count: 0,
                success: false,
                error: Some(ApiError::Network("no such object".into())),
            },
        }
    }
}

// ============================================================================
// Fake downstream
// ============================================================================

#[derive(Debug, Clone)]
struct FakeItem {
    id: String,
    name: String,
    is_folder: bool,
    size: u64,
}

#[derive(Default)]
struct FakeStoreState {
    /// parent folder id → children
    children: HashMap<String, Vec<FakeItem>>,
    next_id: u64,
    uploads: u64,
}

struct FakeStore {
    state: Mutex<FakeStoreState>,
    fail_root: bool,
}

impl FakeStore {
    fn new() -> Self {
        Self {
            state: Mutex::new(FakeStoreState::default()),
            fail_root: false,
        }
    }

    fn failing_root() -> Self {
        Self {
            state: Mutex::new(FakeStoreState::default()),
            fail_root: true,
        }
    }

    fn uploads(&self) -> u64 {
        self.state.lock().unwrap().uploads
    }

    /// Resolves a `/`-separated path under the root folder.
    fn lookup(&self, path: &str) -> Option<FakeItem> {
        let state = self.state.lock().unwrap();
        let mut folder = "root".to_string();
        let mut found: Option<FakeItem> = None;
        for segment in path.split('/') {
            let item = state
                .children
                .get(&folder)?
                .iter()
                .find(|c| c.name == segment)?
                .clone();
            folder = item.id.clone();
            found = Some(item);
        }
        found
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn find_user_root(
        &self,
        _cancel: &CancellationToken,
        _box_email: &str,
    ) -> Result<StoreRoot, ApiError> {
        if self.fail_root {
            return Err(ApiError::Auth("access denied".into()));
        }
        let mut state = self.state.lock().unwrap();
        state.children.entry("root".into()).or_default();
        Ok(StoreRoot {
            user_id: "u-1".into(),
            folder_id: "root".into(),
        })
    }

    async fn find_or_create_folder_path(
        &self,
        _cancel: &CancellationToken,
        _root: &StoreRoot,
        segments: &[String],
    ) -> Result<String, ApiError> {
        let mut state = self.state.lock().unwrap();
        let mut current = "root".to_string();
        for segment in segments {
            let existing = state
                .children
                .get(&current)
                .and_then(|c| c.iter().find(|i| i.name == *segment))
                .map(|i| i.id.clone());
            current = match existing {
                Some(id) => id,
                None => {
                    state.next_id += 1;
                    let id = format!("folder-{}", state.next_id);
                    state.children.entry(current.clone()).or_default().push(FakeItem {
                        id: id.clone(),
                        name: segment.clone(),
                        is_folder: true,
                        size: 0,
                    });
                    state.children.entry(id.clone()).or_default();
                    id
                }
            };
        }
        Ok(current)
    }

    async fn find_child_by_name(
        &self,
        _cancel: &CancellationToken,
        _root: &StoreRoot,
        folder_id: &str,
        name: &str,
    ) -> Result<Option<RemoteEntry>, ApiError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .children
            .get(folder_id)
            .and_then(|c| c.iter().find(|i| i.name == name))
            .map(|i| RemoteEntry {
                id: i.id.clone(),
                name: i.name.clone(),
                size: (!i.is_folder).then_some(i.size),
            }))
    }

    async fn upload_stream(
        &self,
        _cancel: &CancellationToken,
        _root: &StoreRoot,
        folder_id: &str,
        name: &str,
        local_path: &Path,
    ) -> Result<RemoteEntry, ApiError> {
        let size = std::fs::metadata(local_path)
            .map_err(|e| ApiError::Unknown(e.to_string()))?
            .len();
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.uploads += 1;
        let id = format!("file-{}", state.next_id);
        state
            .children
            .entry(folder_id.to_string())
            .or_default()
            .push(FakeItem {
                id: id.clone(),
                name: name.to_string(),
                is_folder: false,
                size,
            });
        Ok(RemoteEntry {
            id,
            name: name.to_string(),
            size: Some(size),
        })
    }

    async fn upload_with_progress(
        &self,
        cancel: &CancellationToken,
        root: &StoreRoot,
        folder_id: &str,
        name: &str,
        local_path: &Path,
        _on_progress: Option<ProgressCallback>,
    ) -> Result<RemoteEntry, ApiError> {
        self.upload_stream(cancel, root, folder_id, name, local_path)
            .await
    }
}

// ============================================================================
// Harness
// ============================================================================

fn recording(uuid: &str, topic: &str, start: &str, files: serde_json::Value) -> Recording {
    serde_json::from_value(serde_json::json!({
        "uuid": uuid,
        "id": 1,
        "account_id": "acct",
        "host_id": "host",
        "topic": topic,
        "start_time": start,
        "recording_files": files
    }))
    .unwrap()
}

fn test_meeting() -> Recording {
    recording(
        "meet-1",
        "Test Meeting",
        "2024-01-15T10:30:00Z",
        serde_json::json!([{
            "id": "f1",
            "meeting_id": "meet-1",
            "file_type": "MP4",
            "file_size": 1024,
            "download_url": "mem://rec1"
        }]),
    )
}

fn bodies() -> HashMap<String, Vec<u8>> {
    HashMap::from([("mem://rec1".to_string(), vec![7u8; 1024])])
}

struct Harness {
    /// Held for its Drop: everything below lives inside this directory.
    _dir: tempfile::TempDir,
    out: PathBuf,
    users_path: PathBuf,
    status_path: PathBuf,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let users_path = dir.path().join("users.txt");
        tokio::fs::write(
            &users_path,
            "john.doe@example.com,john.doe@example.com,false\n",
        )
        .await
        .unwrap();
        let status_path = dir.path().join("status.json");
        Self {
            _dir: dir,
            out,
            users_path,
            status_path,
        }
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            base_output_dir: self.out.clone(),
            ..PipelineConfig::default()
        }
    }

    async fn run(
        &self,
        source: Arc<FakeSource>,
        store: Arc<FakeStore>,
        config: PipelineConfig,
        check_enabled: bool,
    ) -> recpipe_engine::RunSummary {
        let status = Arc::new(StatusStore::open(&self.status_path).await.unwrap());
        let continue_on_error = config.continue_on_error;
        let processor = UserProcessor::new(
            source as Arc<dyn RecordingSource>,
            Some(store as Arc<dyn ObjectStore>),
            status,
            config,
        );
        let users = ActiveUsersFile::load(&self.users_path).await.unwrap();
        let mut run = MigrationRun::new(users, processor, check_enabled, continue_on_error);
        run.execute(
            &CancellationToken::new(),
            &RunOptions {
                from: "2024-01-01".parse().unwrap(),
                to: "2024-12-31".parse().unwrap(),
                only_user: None,
            },
        )
        .await
        .unwrap()
    }

    async fn user_row(&self) -> String {
        tokio::fs::read_to_string(&self.users_path)
            .await
            .unwrap()
            .lines()
            .next()
            .unwrap()
            .to_string()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn clean_path_migrates_one_recording_end_to_end() {
    let h = Harness::new().await;
    let source = Arc::new(FakeSource::new(vec![test_meeting()], bodies()));
    let store = Arc::new(FakeStore::new());
    let config = PipelineConfig {
        delete_after_upload: true,
        ..h.config()
    };

    let summary = h.run(source.clone(), store.clone(), config, true).await;

    assert_eq!(summary.processed_users, 1);
    assert_eq!(summary.failed_users, 0);
    assert_eq!(summary.totals.downloaded, 1);
    assert_eq!(summary.totals.uploaded, 2); // media + sidecar
    assert_eq!(summary.totals.deleted, 2);
    assert_eq!(summary.totals.errors, 0);

    // Remote tree: <root>/2024/01/15/test-meeting-1030.mp4 (+ sidecar).
    let media = store.lookup("2024/01/15/test-meeting-1030.mp4").unwrap();
    assert_eq!(media.size, 1024);
    assert!(store.lookup("2024/01/15/test-meeting-1030.mp4.json").is_some());
    assert!(store.lookup("uploads.csv").is_some());

    // Local media and sidecar were deleted after placement.
    let day_dir = h.out.join("john.doe/2024/01/15");
    assert!(!day_dir.join("test-meeting-1030.mp4").exists());
    assert!(!day_dir.join("test-meeting-1030.mp4.json").exists());

    // Audit CSV: header, primary row with the real size, sidecar row with
    // zero processing time.
    let csv = tokio::fs::read_to_string(h.out.join("john.doe/uploads.csv"))
        .await
        .unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].contains("test-meeting-1030.mp4,1024,"));
    assert!(lines[2].starts_with("john.doe@example.com,test-meeting-1030.mp4.json,"));
    assert!(lines[2].ends_with(",0"));

    // The user's row flipped to complete.
    assert_eq!(
        h.user_row().await,
        "john.doe@example.com,john.doe@example.com,true"
    );
}

#[tokio::test]
async fn unreachable_root_fails_user_without_touching_files() {
    let h = Harness::new().await;
    let source = Arc::new(FakeSource::new(vec![test_meeting()], bodies()));
    let store = Arc::new(FakeStore::failing_root());

    let summary = h.run(source.clone(), store.clone(), h.config(), true).await;

    assert_eq!(summary.failed_users, 1);
    assert_eq!(summary.totals.errors, 1);
    assert_eq!(source.downloads(), 0, "no downloads may be attempted");
    assert_eq!(store.uploads(), 0);
    assert!(
        !h.out.join("john.doe").exists(),
        "no directories may be created"
    );
    assert_eq!(
        h.user_row().await,
        "john.doe@example.com,john.doe@example.com,false"
    );
}

#[tokio::test]
async fn user_with_no_recordings_is_trivially_complete() {
    let h = Harness::new().await;
    let source = Arc::new(FakeSource::new(vec![], HashMap::new()));
    let store = Arc::new(FakeStore::new());

    let summary = h.run(source, store.clone(), h.config(), true).await;

    assert_eq!(summary.processed_users, 1);
    assert_eq!(summary.failed_users, 0);
    assert!(!h.out.exists(), "no output directory may be created");
    assert_eq!(store.uploads(), 0);
    assert_eq!(
        h.user_row().await,
        "john.doe@example.com,john.doe@example.com,true"
    );
}

#[tokio::test]
async fn second_run_performs_no_new_work() {
    let h = Harness::new().await;
    let source = Arc::new(FakeSource::new(vec![test_meeting()], bodies()));
    let store = Arc::new(FakeStore::new());

    h.run(source.clone(), store.clone(), h.config(), true).await;
    assert_eq!(store.uploads(), 3); // media + sidecar + uploads.csv
    assert_eq!(source.downloads(), 1);

    // Process the same user again (completion check disabled so the user
    // is revisited at all): nothing is downloaded or uploaded again.
    let summary = h.run(source.clone(), store.clone(), h.config(), false).await;
    assert_eq!(store.uploads(), 3);
    assert_eq!(source.downloads(), 1);
    assert_eq!(summary.failed_users, 0);
}

#[tokio::test]
async fn check_before_upload_hits_when_status_is_lost() {
    let h = Harness::new().await;
    let source = Arc::new(FakeSource::new(vec![test_meeting()], bodies()));
    let store = Arc::new(FakeStore::new());

    h.run(source.clone(), store.clone(), h.config(), true).await;
    let uploads_after_first = store.uploads();

    // Lose the status store (crash, fresh machine). Local files and the
    // remote tree survive; the existence probe prevents re-uploads.
    tokio::fs::remove_file(&h.status_path).await.unwrap();
    let summary = h.run(source.clone(), store.clone(), h.config(), false).await;

    assert_eq!(store.uploads(), uploads_after_first, "zero new uploads");
    assert_eq!(source.downloads(), 1, "local file of the right size is adopted");
    assert_eq!(summary.totals.errors, 0);
}

#[tokio::test]
async fn failed_download_keeps_user_incomplete() {
    let h = Harness::new().await;
    // The download URL has no body behind it: every download fails.
    let source = Arc::new(FakeSource::new(vec![test_meeting()], HashMap::new()));
    let store = Arc::new(FakeStore::new());

    let summary = h.run(source, store.clone(), h.config(), true).await;

    assert_eq!(summary.failed_users, 1);
    assert_eq!(summary.totals.errors, 1);
    assert_eq!(store.uploads(), 0);
    assert_eq!(
        h.user_row().await,
        "john.doe@example.com,john.doe@example.com,false"
    );
}

#[tokio::test]
async fn stop_on_first_error_when_continue_is_off() {
    let h = Harness::new().await;
    let rec = recording(
        "meet-2",
        "Two Files",
        "2024-02-01T09:00:00Z",
        serde_json::json!([
            {"id": "bad", "file_type": "MP4", "file_size": 10, "download_url": "mem://missing"},
            {"id": "good", "file_type": "CHAT", "file_size": 4, "download_url": "mem://chat"}
        ]),
    );
    let source = Arc::new(FakeSource::new(
        vec![rec],
        HashMap::from([("mem://chat".to_string(), b"chat".to_vec())]),
    ));
    let store = Arc::new(FakeStore::new());
    let config = PipelineConfig {
        continue_on_error: false,
        ..h.config()
    };

    let summary = h.run(source.clone(), store.clone(), config, true).await;

    assert_eq!(summary.failed_users, 1);
    assert_eq!(source.downloads(), 1, "the second file is never reached");
}

#[tokio::test]
async fn meta_only_moves_no_media_bytes() {
    let h = Harness::new().await;
    let source = Arc::new(FakeSource::new(vec![test_meeting()], bodies()));
    let store = Arc::new(FakeStore::new());
    let config = PipelineConfig {
        meta_only: true,
        ..h.config()
    };

    let summary = h.run(source.clone(), store.clone(), config, true).await;

    assert_eq!(source.downloads(), 0);
    // Only the sidecar (and the audit CSV) reach the store.
    assert!(store.lookup("2024/01/15/test-meeting-1030.mp4").is_none());
    assert!(store.lookup("2024/01/15/test-meeting-1030.mp4.json").is_some());
    assert_eq!(summary.totals.errors, 0);
}

#[tokio::test]
async fn file_limit_stops_a_user_early() {
    let h = Harness::new().await;
    let rec = recording(
        "meet-3",
        "Many Files",
        "2024-03-01T09:00:00Z",
        serde_json::json!([
            {"id": "a", "file_type": "MP4", "file_size": 4, "download_url": "mem://a"},
            {"id": "b", "file_type": "M4A", "file_size": 4, "download_url": "mem://b"}
        ]),
    );
    let source = Arc::new(FakeSource::new(
        vec![rec],
        HashMap::from([
            ("mem://a".to_string(), vec![1u8; 4]),
            ("mem://b".to_string(), vec![2u8; 4]),
        ]),
    ));
    let store = Arc::new(FakeStore::new());
    let config = PipelineConfig {
        limit: 1,
        ..h.config()
    };

    h.run(source.clone(), store, config, true).await;
    assert_eq!(source.downloads(), 1);
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let h = Harness::new().await;
    let source = Arc::new(FakeSource::new(vec![test_meeting()], bodies()));
    let store = Arc::new(FakeStore::new());
    let config = PipelineConfig {
        dry_run: true,
        ..h.config()
    };

    let summary = h.run(source.clone(), store.clone(), config, true).await;

    assert_eq!(source.downloads(), 0);
    assert_eq!(store.uploads(), 0);
    assert_eq!(summary.totals.downloaded, 1, "intent is still reported");
}
