//! The `users` command: list or reset rows of the active users file.

use clap::Args;
use recpipe_core::config::Config;
use recpipe_state::ActiveUsersFile;

#[derive(Debug, Args)]
pub struct UsersCommand {
    /// Flip this user back to incomplete so the next run revisits them
    #[arg(long, value_name = "ZOOM_EMAIL")]
    reset: Option<String>,
}

impl UsersCommand {
    pub async fn execute(self, config: Config) -> anyhow::Result<u8> {
        let mut users = match ActiveUsersFile::load(&config.active_users.file_path).await {
            Ok(users) => users,
            Err(e) => {
                eprintln!(
                    "failed to load active users file {}: {e}",
                    config.active_users.file_path.display()
                );
                return Ok(1);
            }
        };

        if let Some(email) = self.reset {
            users.mark_complete(&email, false).await?;
            println!("{email} reset to incomplete");
            return Ok(0);
        }

        let entries = users.entries();
        if entries.is_empty() {
            println!("no users in {}", config.active_users.file_path.display());
            return Ok(0);
        }
        for entry in entries {
            println!(
                "{}\t{}\t{}",
                entry.zoom_email,
                entry.box_email,
                if entry.upload_complete {
                    "complete"
                } else {
                    "pending"
                }
            );
        }
        Ok(0)
    }
}
