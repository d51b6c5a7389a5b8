//! Run driver.
//!
//! Walks the Active Users File, processes each pending user, and flips the
//! completion column atomically per user. A user's `true` is durable on
//! disk before the next user's first download begins.

use chrono::NaiveDate;
use recpipe_state::ActiveUsersFile;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::user_task::UserProcessor;
use crate::{Counters, EngineError};

/// Parameters of one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Start of the listing range (inclusive)
    pub from: NaiveDate,
    /// End of the listing range (inclusive)
    pub to: NaiveDate,
    /// Restrict the run to one upstream email
    pub only_user: Option<String>,
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub processed_users: u64,
    pub failed_users: u64,
    pub totals: Counters,
}

/// Drives a whole migration run over the Active Users File.
pub struct MigrationRun {
    users: ActiveUsersFile,
    processor: UserProcessor,
    /// When true, users already marked complete are skipped.
    check_enabled: bool,
    /// When false, the run stops at the first failed user.
    continue_on_error: bool,
}

impl MigrationRun {
    pub fn new(
        users: ActiveUsersFile,
        processor: UserProcessor,
        check_enabled: bool,
        continue_on_error: bool,
    ) -> Self {
        Self {
            users,
            processor,
            check_enabled,
            continue_on_error,
        }
    }

    pub async fn execute(
        &mut self,
        cancel: &CancellationToken,
        options: &RunOptions,
    ) -> Result<RunSummary, EngineError> {
        let mut candidates = if self.check_enabled {
            self.users.pending()
        } else {
            self.users.entries()
        };
        if let Some(only) = &options.only_user {
            candidates.retain(|u| u.zoom_email.eq_ignore_ascii_case(only));
        }

        info!(
            users = candidates.len(),
            from = %options.from,
            to = %options.to,
            "starting migration run"
        );

        let mut summary = RunSummary::default();
        for user in candidates {
            if cancel.is_cancelled() {
                info!("run cancelled, stopping before the next user");
                break;
            }

            let outcome = self
                .processor
                .process_user(cancel, &user, options.from, options.to)
                .await;

            summary.processed_users += 1;
            summary.totals.merge(&outcome.counters);

            info!(
                user = outcome.zoom_email,
                downloaded = outcome.counters.downloaded,
                uploaded = outcome.counters.uploaded,
                skipped = outcome.counters.skipped,
                deleted = outcome.counters.deleted,
                errors = outcome.counters.errors,
                completed = outcome.completed,
                "user finished"
            );

            // The completion flag is durable before the next user starts.
            // An incomplete user is written back too, so the file's
            // modification time tracks the run.
            self.users
                .mark_complete(&user.zoom_email, outcome.completed)
                .await?;

            if !outcome.completed {
                summary.failed_users += 1;
                if !self.continue_on_error {
                    break;
                }
            }
        }

        info!(
            processed = summary.processed_users,
            failed = summary.failed_users,
            downloaded = summary.totals.downloaded,
            uploaded = summary.totals.uploaded,
            skipped = summary.totals.skipped,
            deleted = summary.totals.deleted,
            errors = summary.totals.errors,
            "migration run finished"
        );
        Ok(summary)
    }

    /// The users file, for inspection after a run.
    pub fn users(&self) -> &ActiveUsersFile {
        &self.users
    }
}
