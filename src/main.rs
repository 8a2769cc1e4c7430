use std::{
    io::{self, BufRead},
    process,
    sync::Arc,
    time::Duration,
};

use tokio::signal;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use verdant::{
    application::{
        content::ContentService,
        error::AppError,
        repos::RecordsRepo,
        sessions::{AdminAccount, AdminSessionGuard, SessionPolicy, hash_password},
        store::EntityStore,
    },
    config,
    infra::{
        db::PostgresRepositories, error::InfraError, http, memory::InMemoryRepositories,
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging).map_err(AppError::from)?;
            run_serve(settings).await
        }
        config::Command::HashPassword(args) => run_hash_password(args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repo = init_repository(&settings).await?;
    let store = Arc::new(EntityStore::open(repo).await?);
    let guard = build_session_guard(&settings.admin)?;
    let content = ContentService::new(store, guard);

    let addr = settings.server.addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::from(InfraError::Bind { addr, source }))?;
    info!(%addr, "content API listening");

    let sweeper = spawn_session_sweeper(content.clone());
    let grace = settings.server.graceful_shutdown;
    let router = http::build_router(content);

    let result = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(grace))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    sweeper.abort();
    let _ = sweeper.await;
    info!("content API stopped");
    result
}

async fn init_repository(settings: &config::Settings) -> Result<Arc<dyn RecordsRepo>, AppError> {
    let Some(database_url) = settings.database.url.as_ref() else {
        warn!("no database url configured; content is kept in memory only");
        return Ok(Arc::new(InMemoryRepositories::new()));
    };

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(InfraError::from)?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;
    info!(
        max_connections = settings.database.max_connections.get(),
        "postgres store ready"
    );

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn build_session_guard(admin: &config::AdminSettings) -> Result<AdminSessionGuard, AppError> {
    let digest = admin.password_sha256.as_deref().ok_or_else(|| {
        AppError::from(InfraError::configuration(
            "admin.password_sha256 is not configured; generate one with `verdant hash-password`",
        ))
    })?;
    let account = AdminAccount::from_hex_digest(&admin.username, digest).map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "admin.password_sha256 is not valid hex: {err}"
        )))
    })?;

    Ok(AdminSessionGuard::new(
        account,
        SessionPolicy {
            ttl: admin.session_ttl,
            login_window: admin.login_window,
            login_max_failures: admin.login_max_failures.get(),
        },
    ))
}

fn spawn_session_sweeper(content: ContentService) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let purged = content.guard().purge_expired();
            if purged > 0 {
                info!(purged, "expired admin sessions purged");
            }
        }
    })
}

async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(grace_secs = grace.as_secs(), "shutdown requested; draining connections");
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        error!("graceful shutdown timed out; exiting");
        process::exit(1);
    });
}

fn run_hash_password(args: config::HashPasswordArgs) -> Result<(), AppError> {
    let password = match args.password {
        Some(password) => password,
        None => {
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        return Err(AppError::validation("password must not be empty"));
    }
    println!("{}", hash_password(&password));
    Ok(())
}
