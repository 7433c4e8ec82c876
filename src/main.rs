use clap::Parser;
use tracing::{error, info};
use userbase::cli::{
    Args, build_config, handle_create_admin, init_logging, load_jwt_secret, open_database,
};
use userbase::{create_app, init_cleanup, run_server};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(username) = args.create_admin.as_deref()
        && !handle_create_admin(&db, username).await
    {
        std::process::exit(1);
    }

    let config = build_config(&args, db, jwt_secret);
    let app = create_app(&config).unwrap_or_else(|e| {
        error!(error = %e, "Invalid token configuration");
        std::process::exit(1);
    });

    init_cleanup(&config.db).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(_) => info!(address = %addr, "Listening"),
    }

    if let Err(e) = run_server(app, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
