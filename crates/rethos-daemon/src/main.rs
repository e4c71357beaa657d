use clap::Parser;

use rethos_daemon::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        rethos_daemon::logging::init_json();
    } else {
        rethos_daemon::logging::init();
    }

    if let Err(e) = rethos_daemon::run(cli).await {
        tracing::error!("fatal: {e}");
        std::process::exit(1);
    }
}
