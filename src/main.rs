use clap::Parser;
use tokio::net::TcpListener;

use student_portal::api;
use student_portal::config::Config;
use student_portal::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::parse();
    let state = AppState::from_config(&config).await?;
    let cors = api::cors_layer(&config.cors_allow_origins, config.cors_allow_credentials)?;
    let app = student_portal::app(state, cors);

    let listener = TcpListener::bind(config.listen).await?;
    log::info!("Starting student portal HTTP server on http://{}", config.listen);
    axum::serve(listener, app).await?;
    Ok(())
}
