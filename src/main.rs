use vita_sana::config::AppConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("[App] {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = vita_sana::run(config).await {
        log::error!("[App] {}", e);
        std::process::exit(1);
    }
}
