//! The `config` command: show or validate configuration.

use clap::Subcommand;
use recpipe_core::config::Config;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration with secrets redacted
    Show,
    /// Check the configuration and report every problem
    Validate,
}

impl ConfigCommand {
    pub async fn execute(self, config: Config) -> anyhow::Result<u8> {
        match self {
            ConfigCommand::Show => {
                let mut redacted = config.clone();
                redact(&mut redacted.zoom.client_secret);
                redact(&mut redacted.r#box.client_secret);
                println!("{}", serde_yaml::to_string(&redacted)?);
                Ok(0)
            }
            ConfigCommand::Validate => {
                let problems = config.validate();
                if problems.is_empty() {
                    println!("configuration is valid");
                    Ok(0)
                } else {
                    for problem in &problems {
                        eprintln!("config error: {problem}");
                    }
                    Ok(1)
                }
            }
        }
    }
}

fn redact(secret: &mut String) {
    if !secret.is_empty() {
        *secret = "********".to_string();
    }
}
