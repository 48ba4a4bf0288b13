mod api;
mod app;
mod config;
mod domain;
mod error;
mod logging;
mod middleware;
mod routes;
mod services;

use anyhow::Result;

use domain::pricing::PricingPolicy;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let settings = config::Settings::from_env()?;

    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        storage_dir = %settings.storage_dir.display(),
        public_dir = %settings.public_dir.display(),
        "Starting pest-control proposal service"
    );

    let paths = settings.paths();
    if !paths.calculation_template.is_file() {
        tracing::warn!(
            path = %paths.calculation_template.display(),
            "Calculation template not found - proposal requests will fail until it is installed"
        );
    }
    tokio::fs::create_dir_all(&paths.inspection_uploads).await?;

    let state = app::AppState::new(settings.clone(), PricingPolicy::default());
    if paths.calculation_template.is_file() {
        match state.assembler.engine().unsupported_formulas() {
            Ok(found) => {
                for formula in &found {
                    tracing::warn!(
                        sheet = %formula.sheet,
                        cell = %formula.cell,
                        reason = %formula.reason,
                        "Calculation template formula cannot be evaluated"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "Could not inspect calculation template"),
        }
    }
    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
