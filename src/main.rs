/// Autoflow: autonomous workflow automation engine
///
/// Main entry point for the autoflow host. Loads configuration from the
/// environment and runs the trigger scheduler until Ctrl-C.

use autoflow::{app::start, config::Config};

/// Application entry point
///
/// Configuration comes from `AUTOFLOW_*` environment variables:
/// - Workflows are read from `$AUTOFLOW_WORKSPACE_ROOT/$AUTOFLOW_WORKFLOWS_DIR`
/// - Trigger state is kept in `$AUTOFLOW_TRIGGERS_FILE`
/// - Triggers are checked every `$AUTOFLOW_CHECK_INTERVAL_MS`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start(config).await?;

    Ok(())
}
