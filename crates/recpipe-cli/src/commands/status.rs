//! The `status` command: inspect the download status store.

use std::collections::BTreeMap;

use clap::Args;
use recpipe_core::config::Config;
use recpipe_core::domain::DownloadStatus;
use recpipe_state::StatusStore;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

impl StatusCommand {
    pub async fn execute(self, config: Config) -> anyhow::Result<u8> {
        let path = config
            .pipeline
            .base_output_dir
            .join("download_status.json");
        if !path.exists() {
            // Inspection must not conjure up state that a run never wrote.
            println!("no status store at {}", path.display());
            return Ok(0);
        }
        let store = StatusStore::open(&path).await?;
        let entries = store.all().await;

        let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
        for entry in &entries {
            *by_status.entry(entry.status.to_string()).or_default() += 1;
        }
        let pending_uploads = store.pending_remote_uploads().await;
        let failed_uploads = store.failed_remote_uploads().await;

        if self.json {
            let doc = serde_json::json!({
                "status_file": path,
                "total": entries.len(),
                "by_status": by_status,
                "pending_uploads": pending_uploads.iter().map(|e| &e.file_id).collect::<Vec<_>>(),
                "failed_uploads": failed_uploads.iter().map(|e| serde_json::json!({
                    "file_id": e.file_id,
                    "attempts": e.box_upload.upload_attempts,
                    "error": e.box_upload.upload_error,
                })).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
            return Ok(0);
        }

        println!("status store: {}", path.display());
        println!("tracked files: {}", entries.len());
        for (status, count) in &by_status {
            println!("  {status}: {count}");
        }
        let completed = entries
            .iter()
            .filter(|e| e.status == DownloadStatus::Completed)
            .count();
        let uploaded = entries.iter().filter(|e| e.box_upload.uploaded).count();
        println!("downloaded locally: {completed}, placed downstream: {uploaded}");

        if !pending_uploads.is_empty() {
            println!("\npending uploads ({}):", pending_uploads.len());
            for entry in &pending_uploads {
                println!("  {} -> {}", entry.file_id, entry.local_path.display());
            }
        }
        if !failed_uploads.is_empty() {
            println!("\nfailed uploads ({}):", failed_uploads.len());
            for entry in &failed_uploads {
                println!(
                    "  {} ({} attempts): {}",
                    entry.file_id,
                    entry.box_upload.upload_attempts,
                    entry.box_upload.upload_error.as_deref().unwrap_or("?")
                );
            }
        }
        Ok(0)
    }
}
