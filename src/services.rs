use crate::codes::{generate_code, login_code_key, reset_code_key, CodeStore};
use crate::config::{AppConfig, DbPool};
use crate::db::{self, is_unique_violation};
use crate::errors::ApiError;
use crate::models::*;
use crate::telegram::Messenger;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error, info, warn};
use std::time::Duration as StdDuration;
use uuid::Uuid;

/// Strips the decoration people type into phone numbers.
pub fn normalize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '-' | '+' | ' '))
        .collect()
}

pub struct AuthService;

impl AuthService {
    pub fn hash_password(password: &str) -> Result<String, ApiError> {
        hash(password, DEFAULT_COST)
            .map_err(|e| {
                error!("Failed to hash password: {}", e);
                ApiError::InternalError("Failed to hash password".to_string())
            })
    }

    pub fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
        verify(password, hash)
            .map_err(|e| {
                error!("Failed to verify password: {}", e);
                ApiError::InternalError("Failed to verify password".to_string())
            })
    }

    pub fn generate_token(account_id: i32, kind: TokenKind, config: &AppConfig) -> Result<String, ApiError> {
        let now = Utc::now();
        let lifetime = match kind {
            TokenKind::Access => Duration::hours(config.jwt_expiry),
            TokenKind::Refresh => Duration::days(config.refresh_expiry),
        };

        let claims = Claims {
            sub: account_id.to_string(),
            exp: (now + lifetime).timestamp() as usize,
            iat: now.timestamp() as usize,
            kind,
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::new(config.jwt_algorithm),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes())
        )
        .map_err(|e| {
            error!("Failed to generate token: {}", e);
            ApiError::InternalError("Failed to generate token".to_string())
        })
    }

    pub fn issue_tokens(account_id: i32, config: &AppConfig) -> Result<TokenResponse, ApiError> {
        Ok(TokenResponse {
            access_token: Self::generate_token(account_id, TokenKind::Access, config)?,
            refresh_token: Self::generate_token(account_id, TokenKind::Refresh, config)?,
            customer_id: account_id,
        })
    }

    /// Validates signature, expiry and token kind; returns the account id.
    pub fn decode_token(token: &str, expected: TokenKind, config: &AppConfig) -> Result<i32, ApiError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            &Validation::new(config.jwt_algorithm),
        )
        .map_err(|e| {
            debug!("Rejected token: {}", e);
            ApiError::AuthError("Signature verification failed".to_string())
        })?;

        if data.claims.kind != expected {
            return Err(ApiError::AuthError(match expected {
                TokenKind::Access => "Only access tokens are allowed".to_string(),
                TokenKind::Refresh => "Only refresh tokens are allowed".to_string(),
            }));
        }

        data.claims
            .sub
            .parse::<i32>()
            .map_err(|_| ApiError::AuthError("Invalid token subject".to_string()))
    }
}

fn user_not_found() -> ApiError {
    ApiError::NotFoundError("user_not_found".to_string())
}

fn find_account(conn: &mut PgConnection, account_id: i32) -> Result<Option<Account>, ApiError> {
    use crate::schema::customer::dsl::*;
    Ok(customer.find(account_id).first::<Account>(conn).optional()?)
}

/// Registration, authentication and profile management.
#[derive(Clone)]
pub struct AccountService {
    pool: DbPool,
    codes: CodeStore,
    messenger: Messenger,
    config: AppConfig,
}

impl AccountService {
    pub fn new(pool: DbPool, codes: CodeStore, messenger: Messenger, config: AppConfig) -> Self {
        Self { pool, codes, messenger, config }
    }

    async fn find_by_tg_id(&self, identity: &str) -> Result<Option<Account>, ApiError> {
        let identity = identity.to_string();
        db::run(&self.pool, move |conn| {
            use crate::schema::customer::dsl::*;
            Ok(customer
                .filter(tg_id.eq(identity))
                .first::<Account>(conn)
                .optional()?)
        })
        .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, ApiError> {
        let username = username.to_string();
        db::run(&self.pool, move |conn| {
            use crate::schema::customer::dsl::*;
            Ok(customer
                .filter(tg_username.eq(username))
                .first::<Account>(conn)
                .optional()?)
        })
        .await
    }

    async fn send_code(&self, key: &str, chat_id: &str) -> Result<(), ApiError> {
        let code = generate_code();
        self.codes
            .put(key, &code.to_string(), StdDuration::from_secs(self.config.otp_ttl))
            .await?;
        self.messenger
            .send_message(chat_id, &format!("Your confirmation code: {}", code))
            .await?;
        info!("Confirmation code sent to Telegram chat {}", chat_id);
        Ok(())
    }

    /// True when the stored code under `key` equals `submitted`.
    async fn code_matches(&self, key: &str, submitted: u32) -> Result<bool, ApiError> {
        let stored = self.codes.get(key).await?;
        Ok(stored.map_or(false, |code| code.trim() == submitted.to_string()))
    }

    async fn consume_code(&self, key: &str) {
        if let Err(e) = self.codes.remove(key).await {
            warn!("Failed to invalidate code {}: {}", key, e);
        }
    }

    pub async fn request_code(&self, identity: &str) -> Result<bool, ApiError> {
        match self.find_by_tg_id(identity).await? {
            Some(account) => {
                self.send_code(&login_code_key(identity), &account.tg_id).await?;
                Ok(true)
            }
            None => {
                debug!("Code requested for unknown Telegram id {}", identity);
                Ok(false)
            }
        }
    }

    pub async fn authenticate_by_code(&self, request: &AuthoriseRequest) -> Result<TokenResponse, ApiError> {
        let key = login_code_key(&request.tg_id);
        if !self.code_matches(&key, request.code).await? {
            debug!("Code authentication failed for Telegram id {}", request.tg_id);
            return Err(ApiError::AuthError("Incorrect code".to_string()));
        }

        let account = self
            .find_by_tg_id(&request.tg_id)
            .await?
            .ok_or_else(|| ApiError::AuthError("Incorrect code".to_string()))?;

        self.consume_code(&key).await;
        info!("Account {} authenticated by code", account.id);
        AuthService::issue_tokens(account.id, &self.config)
    }

    pub async fn authenticate_by_password(&self, request: &SignInRequest) -> Result<TokenResponse, ApiError> {
        let login = request.username.clone();
        let secret = request.password.clone();

        let account_id = db::run(&self.pool, move |conn| {
            use crate::schema::customer::dsl::*;
            // A handle may equal another account's phone, so every candidate is tried
            let candidates = customer
                .filter(tg_username.eq(&login).or(phone.eq(normalize_phone(&login))))
                .filter(password.is_not_null())
                .order(id.asc())
                .load::<Account>(conn)?;

            for account in candidates {
                if let Some(stored) = account.password.as_deref() {
                    if AuthService::verify_password(&secret, stored)? {
                        return Ok(Some(account.id));
                    }
                }
            }
            Ok(None)
        })
        .await?;

        match account_id {
            Some(account_id) => {
                info!("Account {} signed in", account_id);
                AuthService::issue_tokens(account_id, &self.config)
            }
            None => {
                debug!("Sign-in failed for {}", request.username);
                Err(ApiError::AuthError("Incorrect username or password".to_string()))
            }
        }
    }

    /// Reissues both tokens for the subject of a valid refresh token.
    pub async fn refresh(&self, account_id: i32) -> Result<TokenResponse, ApiError> {
        let exists = db::run(&self.pool, move |conn| Ok(find_account(conn, account_id)?.is_some())).await?;
        if !exists {
            return Err(ApiError::AuthError("Account no longer exists".to_string()));
        }
        AuthService::issue_tokens(account_id, &self.config)
    }

    pub async fn register(&self, request: &SignUpRequest) -> Result<i32, ApiError> {
        let new_account = NewAccount {
            role: request.role,
            name: request.name.clone(),
            tg_id: request.tg_id.clone(),
            tg_username: request.tg_username.clone(),
            status: 0,
        };

        let account_id = db::run(&self.pool, move |conn| {
            conn.transaction::<_, ApiError, _>(|conn| {
                use crate::schema::customer::dsl::*;
                let taken = customer
                    .filter(tg_id.eq(&new_account.tg_id))
                    .select(id)
                    .first::<i32>(conn)
                    .optional()?;
                if taken.is_some() {
                    return Err(ApiError::ForbiddenError("user_not_allowed".to_string()));
                }

                diesel::insert_into(customer)
                    .values(&new_account)
                    .returning(id)
                    .get_result::<i32>(conn)
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            ApiError::ForbiddenError("user_not_allowed".to_string())
                        } else {
                            e.into()
                        }
                    })
            })
        })
        .await?;

        info!("Registered account {} for Telegram id {}", account_id, request.tg_id);
        Ok(account_id)
    }

    pub async fn get_profile(&self, account_id: i32) -> Result<Profile, ApiError> {
        let account = db::run(&self.pool, move |conn| find_account(conn, account_id))
            .await?
            .ok_or_else(user_not_found)?;
        Ok(Profile::from(&account))
    }

    pub async fn update_profile(&self, account_id: i32, request: &EditDataRequest) -> Result<Profile, ApiError> {
        let changes = AccountChanges {
            name: request.name.clone(),
            email: request.email.clone(),
            phone: request.phone.as_deref().map(normalize_phone),
            tg_username: request.username.clone(),
        };

        let account = db::run(&self.pool, move |conn| {
            use crate::schema::customer::dsl::*;
            Ok(diesel::update(customer.find(account_id))
                .set(&changes)
                .get_result::<Account>(conn)
                .optional()?)
        })
        .await?
        .ok_or_else(user_not_found)?;

        info!("Profile of account {} updated", account_id);
        Ok(Profile::from(&account))
    }

    pub async fn set_password(&self, account_id: i32, request: &NewPasswordRequest) -> Result<(), ApiError> {
        if request.new_password != request.confirm_password {
            return Err(ApiError::ValidationError("different_values".to_string()));
        }
        let new_password = request.new_password.clone();

        let updated = db::run(&self.pool, move |conn| {
            use crate::schema::customer::dsl::*;
            let hashed = AuthService::hash_password(&new_password)?;
            Ok(diesel::update(customer.find(account_id))
                .set(password.eq(Some(hashed)))
                .execute(conn)?)
        })
        .await?;

        if updated == 0 {
            return Err(user_not_found());
        }
        info!("Password set for account {}", account_id);
        Ok(())
    }

    pub async fn request_reset_code(&self, username: &str) -> Result<bool, ApiError> {
        match self.find_by_username(username).await? {
            Some(account) => {
                self.send_code(&reset_code_key(username), &account.tg_id).await?;
                Ok(true)
            }
            None => {
                debug!("Reset code requested for unknown username {}", username);
                Ok(false)
            }
        }
    }

    pub async fn reset_password(&self, request: &ResetPasswordRequest) -> Result<(), ApiError> {
        let key = reset_code_key(&request.username);
        let account = match self.find_by_username(&request.username).await? {
            Some(account) if self.code_matches(&key, request.code).await? => account,
            _ => return Err(user_not_found()),
        };

        if request.new_password != request.confirm_password {
            return Err(ApiError::ValidationError("different_values".to_string()));
        }

        let new_password = request.new_password.clone();
        let account_id = account.id;
        db::run(&self.pool, move |conn| {
            use crate::schema::customer::dsl::*;
            let hashed = AuthService::hash_password(&new_password)?;
            diesel::update(customer.find(account_id))
                .set(password.eq(Some(hashed)))
                .execute(conn)?;
            Ok(())
        })
        .await?;

        self.consume_code(&key).await;
        info!("Password reset for account {}", account_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::lazy_pool;
    use crate::telegram::DummyMessenger;

    fn service(codes: CodeStore) -> AccountService {
        let config = AppConfig::for_tests();
        AccountService::new(
            lazy_pool(&config.database_url),
            codes,
            Messenger::Dummy(DummyMessenger::new()),
            config,
        )
    }

    #[test]
    fn phone_normalization_strips_decoration() {
        assert_eq!(normalize_phone("+7 (900) 123-45-67"), "79001234567");
        assert_eq!(normalize_phone("79001234567"), "79001234567");
        assert_eq!(normalize_phone("ann_k"), "ann_k");
    }

    #[test]
    fn password_hash_verifies() {
        let hashed = AuthService::hash_password("s3cret").unwrap();
        assert_ne!(hashed, "s3cret");
        assert!(AuthService::verify_password("s3cret", &hashed).unwrap());
        assert!(!AuthService::verify_password("other", &hashed).unwrap());
    }

    #[test]
    fn tokens_carry_subject_and_kind() {
        let config = AppConfig::for_tests();
        let tokens = AuthService::issue_tokens(17, &config).unwrap();
        assert_eq!(tokens.customer_id, 17);
        assert_eq!(AuthService::decode_token(&tokens.access_token, TokenKind::Access, &config).unwrap(), 17);
        assert_eq!(AuthService::decode_token(&tokens.refresh_token, TokenKind::Refresh, &config).unwrap(), 17);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let config = AppConfig::for_tests();
        let tokens = AuthService::issue_tokens(17, &config).unwrap();
        assert!(matches!(
            AuthService::decode_token(&tokens.refresh_token, TokenKind::Access, &config),
            Err(ApiError::AuthError(_))
        ));
        assert!(matches!(
            AuthService::decode_token(&tokens.access_token, TokenKind::Refresh, &config),
            Err(ApiError::AuthError(_))
        ));
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let config = AppConfig::for_tests();
        let other = AppConfig::for_tests();
        let token = AuthService::generate_token(1, TokenKind::Access, &other).unwrap();
        assert!(AuthService::decode_token(&token, TokenKind::Access, &config).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = AppConfig::for_tests();
        let past = (Utc::now() - Duration::hours(2)).timestamp() as usize;
        let claims = Claims {
            sub: "1".into(),
            exp: past,
            iat: past - 60,
            kind: TokenKind::Access,
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::new(config.jwt_algorithm),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();
        assert!(AuthService::decode_token(&token, TokenKind::Access, &config).is_err());
    }

    #[test]
    fn access_lifetime_follows_config() {
        let mut config = AppConfig::for_tests();
        config.jwt_expiry = 72;
        let token = AuthService::generate_token(1, TokenKind::Access, &config).unwrap();
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            &Validation::new(config.jwt_algorithm),
        )
        .unwrap();
        assert_eq!(data.claims.exp - data.claims.iat, 72 * 3600);
    }

    #[actix_web::test]
    async fn code_must_match_exactly() {
        let codes = CodeStore::in_memory();
        codes.put("otp:42", "12345", StdDuration::from_secs(600)).await.unwrap();
        let service = service(codes);

        assert!(service.code_matches("otp:42", 12345).await.unwrap());
        assert!(!service.code_matches("otp:42", 12346).await.unwrap());
        assert!(!service.code_matches("otp:43", 12345).await.unwrap());
    }

    #[actix_web::test]
    async fn wrong_code_is_unauthorized_before_touching_accounts() {
        let codes = CodeStore::in_memory();
        codes.put("otp:42", "12345", StdDuration::from_secs(600)).await.unwrap();
        let service = service(codes);

        let result = service
            .authenticate_by_code(&AuthoriseRequest { tg_id: "42".into(), code: 54321 })
            .await;
        assert!(matches!(result, Err(ApiError::AuthError(_))));
    }

    #[actix_web::test]
    async fn code_for_one_identity_does_not_authenticate_another() {
        let codes = CodeStore::in_memory();
        codes.put("otp:42", "12345", StdDuration::from_secs(600)).await.unwrap();
        let service = service(codes);

        let result = service
            .authenticate_by_code(&AuthoriseRequest { tg_id: "43".into(), code: 12345 })
            .await;
        assert!(matches!(result, Err(ApiError::AuthError(_))));
    }

    #[actix_web::test]
    async fn reset_code_does_not_sign_in() {
        let codes = CodeStore::in_memory();
        codes.put(&reset_code_key("42"), "12345", StdDuration::from_secs(600)).await.unwrap();
        let service = service(codes);

        let result = service
            .authenticate_by_code(&AuthoriseRequest { tg_id: "42".into(), code: 12345 })
            .await;
        assert!(matches!(result, Err(ApiError::AuthError(_))));
    }

    #[actix_web::test]
    async fn mismatched_passwords_fail_validation() {
        let service = service(CodeStore::in_memory());
        let result = service
            .set_password(1, &NewPasswordRequest { new_password: "a".into(), confirm_password: "b".into() })
            .await;
        match result {
            Err(ApiError::ValidationError(detail)) => assert_eq!(detail, "different_values"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
