use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use marginalia::{auth, config, openapi::ApiDoc, AppState, SecurityHeaders, Settings};

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable `inmem-store` or `postgres-store`");

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let settings = Settings::from_env().context("invalid configuration")?;
    info!(
        bind = %settings.bind,
        allowed_paths = ?settings.allowed_paths,
        edit_window_secs = settings.edit_window.whole_seconds(),
        "bootstrapping comment server"
    );
    if !auth::is_configured() {
        warn!("JWT_SECRET missing or shorter than {} bytes; moderator access disabled", auth::MIN_SECRET_LEN);
    }

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let state = {
        let repo = marginalia::repo::inmem::InMemRepo::new(settings.snapshot_path());
        info!(snapshot = %settings.snapshot_path().display(), "using in-memory comment store");
        AppState::new(repo, settings.clone())
    };

    #[cfg(feature = "postgres-store")]
    let state = {
        use sqlx::postgres::PgPoolOptions;
        let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set for postgres-store")?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .context("failed to connect to Postgres")?;
        let repo = marginalia::repo::pg::PgRepo::new(pool);
        repo.migrate().await.context("failed to run migrations")?;
        info!("using Postgres comment store");
        AppState::new(repo, settings.clone())
    };

    let openapi = ApiDoc::openapi();
    let data = web::Data::new(state);
    let bind = settings.bind.clone();

    let server = HttpServer::new(move || {
        // credentials must be allowed for the ownership cookie to travel cross-origin
        let cors = settings
            .origins
            .iter()
            .fold(Cors::default(), |c, origin| c.allowed_origin(origin))
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allow_any_header()
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::new(settings.enable_hsts))
            .wrap(cors)
            .app_data(data.clone())
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&bind)
    .with_context(|| format!("failed to bind {bind}"))?;

    info!("listening on http://{bind}");
    server.run().await?;
    Ok(())
}
