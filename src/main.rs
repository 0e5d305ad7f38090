use tracing::error;
use webcall_lib::{config::AppConfig, logger};

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    logger::init(&config.logging);

    if let Err(e) = webcall_lib::run(config).await {
        error!("{}", e.user_message());
        std::process::exit(1);
    }
}
