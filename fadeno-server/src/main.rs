use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use structopt::StructOpt;

mod auth;
mod comments;
mod db;
mod error;
mod extractors;
mod gate;
mod handlers;
mod testutil;
mod tree;

pub use error::Error;
use extractors::{AppState, PgPool};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, StructOpt)]
#[structopt(name = "fadeno-server", about = "threaded comment service")]
struct Opt {
    /// Address to listen on
    #[structopt(long, default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Path to the identity service's ES256 public key (pem)
    #[structopt(long, parse(from_os_str))]
    public_key: PathBuf,

    /// Seconds between revocation registry refreshes
    #[structopt(long, default_value = "5")]
    revocation_poll_secs: u64,
}

fn app(state: AppState) -> Router {
    Router::new()
        .route(
            "/comment/:id",
            get(handlers::get_comment)
                .put(handlers::update_comment)
                .delete(handlers::delete_comment),
        )
        .route("/thread/:thread_id/comment", post(handlers::add_comment))
        .route(
            "/thread/:thread_id/comments",
            get(handlers::get_thread).delete(handlers::delete_all_comments),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(50)
        .connect(&db_url)
        .await
        .with_context(|| format!("opening database {:?}", db_url))?;
    MIGRATOR
        .run(&pool)
        .await
        .context("running database migrations")?;

    let pem = std::fs::read_to_string(&opt.public_key)
        .with_context(|| format!("reading public key {:?}", opt.public_key))?;
    let verifier = Arc::new(auth::TokenVerifier::new(&pem).context("building token verifier")?);

    let registry = Arc::new(auth::RevocationRegistry::new());
    let authority_url =
        std::env::var("REVOCATION_URL").context("REVOCATION_URL must be set")?;
    tokio::spawn(auth::run_revocation_poller(
        registry.clone(),
        auth::HttpRevocationFeed::new(authority_url),
        Duration::from_secs(opt.revocation_poll_secs),
    ));

    let state = AppState {
        db: PgPool::new(pool),
        verifier,
        registry,
    };

    tracing::info!("listening on {}", opt.bind);
    axum::Server::bind(&opt.bind)
        .serve(app(state).into_make_service())
        .await
        .context("serving axum webserver")
}
