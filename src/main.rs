use actix_web::{web, App, HttpServer};
use log::{error, info, warn};

use realty::codes::CodeStore;
use realty::config::AppConfig;
use realty::db;
use realty::geocoder::{DadataClient, Geocoder};
use realty::handlers;
use realty::images::ImageStore;
use realty::logger::setup_logger;
use realty::middleware::{cors_policy, RequestLogger};
use realty::offers::{ApplianceService, OfferService};
use realty::services::AccountService;
use realty::telegram::{DummyMessenger, Messenger, TelegramClient};

async fn connect_code_store(config: &AppConfig) -> CodeStore {
    match CodeStore::connect(&config.redis_url).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to connect to Redis: {}", e);
            warn!("Falling back to the in-process code store; codes will not survive restarts");
            CodeStore::in_memory()
        }
    }
}

fn build_messenger(config: &AppConfig) -> Messenger {
    let client = config
        .telegram_token
        .as_deref()
        .map(|token| TelegramClient::new(&config.telegram_api_url, token));
    match client {
        Some(Ok(client)) => {
            info!("Telegram messenger initialized");
            Messenger::Telegram(client)
        }
        Some(Err(e)) => {
            error!("Failed to initialize Telegram client: {}", e);
            Messenger::Dummy(DummyMessenger::new())
        }
        None => {
            warn!("TELEGRAM_TOKEN not set, codes will only be logged");
            Messenger::Dummy(DummyMessenger::new())
        }
    }
}

fn build_geocoder(config: &AppConfig) -> Geocoder {
    let client = config
        .dadata_key
        .as_deref()
        .map(|key| DadataClient::new(&config.dadata_api_url, key));
    match client {
        Some(Ok(client)) => {
            info!("Dadata geocoder initialized");
            Geocoder::Dadata(client)
        }
        Some(Err(e)) => {
            error!("Failed to initialize Dadata client: {}", e);
            Geocoder::Disabled
        }
        None => {
            warn!("DADATA_KEY not set, offer addresses will not be geocoded");
            Geocoder::Disabled
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables and initialize logger
    dotenvy::dotenv().ok();
    setup_logger();

    // Load and validate configuration
    let config = AppConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Configuration validation error: {}", e);
        panic!("Invalid configuration: {}", e);
    }
    if config.smtp.is_some() && config.manager_email.is_some() {
        info!("SMTP settings loaded for manager notifications");
    }

    let images = ImageStore::new(&config.images_dir);
    images.ensure_dir().await.map_err(|e| {
        error!("Failed to prepare images directory {}: {}", config.images_dir, e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    info!("Connecting to database");
    let pool = db::init_pool(&config.database_url).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    let codes = connect_code_store(&config).await;
    let messenger = build_messenger(&config);
    let geocoder = build_geocoder(&config);

    let accounts = web::Data::new(AccountService::new(pool.clone(), codes, messenger, config.clone()));
    let offers = web::Data::new(OfferService::new(pool.clone(), geocoder, images));
    let appliances = web::Data::new(ApplianceService::new(pool.clone()));
    let app_config = web::Data::new(config.clone());

    let (host, port, workers) = (config.host.clone(), config.port, config.workers);
    info!("Starting HTTP server at http://{}:{}", host, port);

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .wrap(cors_policy())
            // Enable request logger middleware
            .wrap(RequestLogger)
            // Register app data
            .app_data(app_config.clone())
            .app_data(accounts.clone())
            .app_data(offers.clone())
            .app_data(appliances.clone())
            .configure(handlers::configure)
    })
    .workers(workers)
    .keep_alive(std::time::Duration::from_secs(75)) // Configure keep-alive
    .shutdown_timeout(30) // Graceful shutdown timeout in seconds
    .bind((host, port))?
    .run()
    .await
}
