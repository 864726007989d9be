use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::info;
use tracing_actix_web::TracingLogger;

use quietboard::config::AppConfig;
use quietboard::csrf::CsrfGuard;
use quietboard::pipeline::SubmissionPipeline;
use quietboard::rate_limit::RateLimiterFacade;
use quietboard::repo::sqlite::SqliteStore;
use quietboard::secret::SecretKey;
use quietboard::telemetry::{init_tracing, AnonymousRootSpan};
use quietboard::{config, AppState, SecurityHeaders};

const LIMITER_SWEEP_EVERY: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    init_tracing();
    let cfg = AppConfig::from_env();
    info!(db = %cfg.db_path.display(), rate_limit = cfg.rate_limit.enabled, "bootstrapping quietboard");

    let store = SqliteStore::open(&cfg.db_path)
        .await
        .with_context(|| format!("opening database {}", cfg.db_path.display()))?;
    store.seed_default_categories().await.context("seeding default categories")?;

    let key = SecretKey::load_or_create(cfg.secret_key.as_deref(), &cfg.db_path).context("loading secret key")?;
    let csrf = CsrfGuard::new(Arc::new(key), cfg.csrf_ttl_secs);

    let limiter = RateLimiterFacade::from_config(cfg.rate_limit.clone());
    let sweeper = limiter.limiter.clone();
    let idle_after = cfg.rate_limit.longest_window();
    actix_web::rt::spawn(async move {
        let mut tick = actix_web::rt::time::interval(LIMITER_SWEEP_EVERY);
        loop {
            tick.tick().await;
            let dropped = sweeper.sweep(idle_after);
            if dropped > 0 {
                tracing::debug!(dropped, "swept idle rate limit keys");
            }
        }
    });

    let store = Arc::new(store);
    let pipeline = Arc::new(SubmissionPipeline::new(store.clone(), csrf).with_rate_limiter(limiter));
    let state = AppState {
        store,
        pipeline,
        threads_per_page: cfg.threads_per_page,
        comments_per_page: cfg.comments_per_page,
    };
    let security = SecurityHeaders::default().with_hsts(cfg.enable_hsts);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::<AnonymousRootSpan>::new())
            .wrap(security.clone())
            .app_data(web::Data::new(state.clone()))
            .configure(config)
    })
    .bind((cfg.host.as_str(), cfg.port))
    .with_context(|| format!("binding {}:{}", cfg.host, cfg.port))?;

    info!("listening on http://{}:{}", cfg.host, cfg.port);
    server.run().await?;
    Ok(())
}
