use anyhow::Result;
use storyforge::core::config::Config;
use storyforge::services::backend::create_backend;
use storyforge::services::session::Session;
use storyforge::services::workflow::WorkflowController;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load or create config
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please fix 'config.yml' or delete it to regenerate defaults.");
            return Err(e);
        }
    };

    // 2. Connect to the story service and load the character catalog
    let backend = create_backend(&config)?;
    let controller = WorkflowController::new(backend, config.settings.clone()).await?;

    // 3. Run the session
    let mut session = Session::new(controller, config);
    session.run().await?;

    Ok(())
}
