use std::{error::Error, process::ExitCode, sync::Arc};

use axum::{http::HeaderValue, Server};
use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};

use todo_graph_api::{
    config::Config,
    logging, maintenance,
    route::{cors_layer, create_router},
    AppState, Coordinator, Store,
};

// Entry point of the application
#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let config = Config::parse();
    logging::init(&config.log_filter);

    let outcome: Result<(), Box<dyn Error + Send + Sync>> = if config.force_unlock {
        maintenance::force_unlock(&config.database_path)
            .map(|removed| info!(removed, "lock files cleared"))
            .map_err(Into::into)
    } else if config.reset_data {
        maintenance::reset_data(&config.data_dir(), &config.backup_dir())
            .map(|_| ())
            .map_err(Into::into)
    } else {
        serve(config).await
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn Error + Send + Sync>> {
    let origin = config.cors_origin.parse::<HeaderValue>()?;

    let store = Store::open(&config.store_location()).await?;
    let app_state = Arc::new(AppState::new(Coordinator::new(store)));

    let app = create_router(app_state.clone()).layer(cors_layer(origin));

    info!(addr = %config.bind_addr, "server started");
    let served = Server::bind(&config.bind_addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Close the store even when the server stopped on an error.
    app_state.coordinator.store().close().await?;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
