use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hobbot::config::Config;
use hobbot::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hobbot=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        "hobbot starting: agent {}, db {}, dry_run {}",
        config.agent_name,
        config.db_path.display(),
        config.dry_run
    );

    let orchestrator = Orchestrator::new(config)?;
    match orchestrator.run().await {
        Ok(summary) => {
            info!(
                "Run complete: {} posts processed, {} comments, {} attacks cataloged",
                summary.posts_processed, summary.comments_made, summary.attacks_detected
            );
            Ok(())
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            Err(e)
        }
    }
}
