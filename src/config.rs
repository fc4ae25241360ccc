use diesel::r2d2::{self, ConnectionManager};
use diesel::pg::PgConnection;
use jsonwebtoken::Algorithm;
use std::env;
use std::str::FromStr;
use log::warn;
use rand::{thread_rng, Rng};
use rand::distributions::Alphanumeric;

pub use crate::errors::ApiError;

// Type aliases
pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

// Database initialization SQL
pub const DB_INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS customer (
    id SERIAL PRIMARY KEY,
    role VARCHAR(50) NOT NULL,
    name VARCHAR(50) NOT NULL,
    tg_id VARCHAR(50) NOT NULL,
    tg_username VARCHAR(50) NOT NULL,
    phone VARCHAR(50),
    email VARCHAR(50),
    password VARCHAR(256),
    status INTEGER NOT NULL DEFAULT 0,
    CONSTRAINT uq_customer_tg_id UNIQUE (tg_id)
);

CREATE TABLE IF NOT EXISTS appliance (
    id SERIAL PRIMARY KEY,
    name VARCHAR(128) NOT NULL,
    CONSTRAINT uq_appliance_name UNIQUE (name)
);

CREATE TABLE IF NOT EXISTS offer (
    id SERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES customer(id),
    img1 VARCHAR NOT NULL,
    img2 VARCHAR,
    img3 VARCHAR,
    address VARCHAR(512) NOT NULL,
    country VARCHAR(64),
    lon DOUBLE PRECISION,
    lat DOUBLE PRECISION,
    title VARCHAR(512) NOT NULL,
    description VARCHAR(2048) NOT NULL,
    type VARCHAR(16) NOT NULL,
    rooms VARCHAR(16) NOT NULL,
    price DOUBLE PRECISION NOT NULL,
    area DOUBLE PRECISION NOT NULL,
    floor INTEGER NOT NULL,
    renovation VARCHAR(64) NOT NULL
);

CREATE TABLE IF NOT EXISTS appliances_map (
    id SERIAL PRIMARY KEY,
    appliance_id INTEGER NOT NULL REFERENCES appliance(id) ON DELETE CASCADE,
    offer_id INTEGER NOT NULL REFERENCES offer(id) ON DELETE CASCADE,
    CONSTRAINT uq_appliances_map_pair UNIQUE (appliance_id, offer_id)
);

CREATE INDEX IF NOT EXISTS idx_offer_user_id ON offer (user_id);
CREATE INDEX IF NOT EXISTS idx_appliances_map_offer_id ON appliances_map (offer_id);
"#;

const DEFAULT_JWT_SECRET: &str = "your_jwt_secret_key_here";

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub login: String,
    pub password: String,
}

// Config
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_algorithm: Algorithm,
    pub jwt_expiry: i64, // In hours
    pub refresh_expiry: i64, // In days
    pub otp_ttl: u64, // In seconds
    pub telegram_token: Option<String>,
    pub telegram_api_url: String,
    pub dadata_key: Option<String>,
    pub dadata_api_url: String,
    pub images_dir: String,
    pub smtp: Option<SmtpConfig>,
    pub manager_email: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(val) => val,
            Err(e) => {
                warn!("Failed to load JWT_SECRET: {}", e);
                warn!("Using default JWT secret - THIS IS NOT SECURE FOR PRODUCTION!");
                DEFAULT_JWT_SECRET.to_string()
            }
        };

        let jwt_algorithm = match Algorithm::from_str(&env_or("JWT_ALGORITHM", "HS256")) {
            Ok(alg) => alg,
            Err(e) => {
                warn!("Unknown JWT_ALGORITHM ({}), falling back to HS256", e);
                Algorithm::HS256
            }
        };

        let smtp = match (env_opt("SMTP_SERVER"), env_opt("SMTP_LOGIN"), env_opt("SMTP_PASS")) {
            (Some(server), Some(login), Some(password)) => Some(SmtpConfig {
                server,
                port: env_parsed("SMTP_PORT", 587),
                login,
                password,
            }),
            _ => None,
        };

        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parsed("PORT", 8080),
            workers: env_parsed("WORKERS", 2),
            database_url: Self::database_url_from_env(),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            jwt_secret,
            jwt_algorithm,
            jwt_expiry: env_parsed("JWT_EXPIRY_HOURS", 72),
            refresh_expiry: env_parsed("REFRESH_EXPIRY_DAYS", 359),
            otp_ttl: env_parsed("OTP_TTL_SECONDS", 600),
            telegram_token: env_opt("TELEGRAM_TOKEN"),
            telegram_api_url: env_or("TELEGRAM_API_URL", "https://api.telegram.org"),
            dadata_key: env_opt("DADATA_KEY"),
            dadata_api_url: env_or("DADATA_API_URL", "https://suggestions.dadata.ru"),
            images_dir: env_or("IMAGES_DIR", "images"),
            smtp,
            manager_email: env_opt("MANAGER_EMAIL"),
        }
    }

    /// `DATABASE_URL` wins; otherwise the URL is assembled from the `DB_*` parts.
    fn database_url_from_env() -> String {
        if let Some(url) = env_opt("DATABASE_URL") {
            return url;
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            env_or("DB_USER", "postgres"),
            env_or("DB_PASS", "postgres"),
            env_or("DB_HOST", "localhost"),
            env_or("DB_PORT", "5432"),
            env_or("DB_NAME", "realty"),
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret == DEFAULT_JWT_SECRET {
            warn!("Using default JWT secret is not secure for production!");
        }

        if !matches!(self.jwt_algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err("JWT_ALGORITHM must be one of HS256, HS384, HS512".to_string());
        }

        if self.jwt_expiry <= 0 {
            return Err("JWT_EXPIRY_HOURS must be positive".to_string());
        }

        if self.refresh_expiry <= 0 {
            return Err("REFRESH_EXPIRY_DAYS must be positive".to_string());
        }

        if self.otp_ttl == 0 {
            return Err("OTP_TTL_SECONDS must be positive".to_string());
        }

        if self.workers == 0 {
            return Err("WORKERS must be positive".to_string());
        }

        Ok(())
    }

    pub fn generate_secure_secret() -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }

    /// Configuration suitable for tests: no external collaborators configured.
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers: 1,
            database_url: "postgres://localhost/realty_test".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            jwt_secret: Self::generate_secure_secret(),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiry: 72,
            refresh_expiry: 359,
            otp_ttl: 600,
            telegram_token: None,
            telegram_api_url: "http://127.0.0.1:1".to_string(),
            dadata_key: None,
            dadata_api_url: "http://127.0.0.1:1".to_string(),
            images_dir: env::temp_dir().join("realty-test-images").to_string_lossy().into_owned(),
            smtp: None,
            manager_email: None,
        }
    }
}
