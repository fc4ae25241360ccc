//! Routes under `/v1`.

use actix_web::{delete, get, post, put, web, HttpResponse, Responder};
use log::debug;
use serde_json::json;

use crate::errors::ApiError;
use crate::middleware::{AuthenticatedAccount, RefreshSubject};
use crate::models::*;
use crate::offers::{ApplianceService, OfferService};
use crate::services::AccountService;

/// Request bodies carry inline images, so the JSON limit is generous.
pub const JSON_LIMIT: usize = 32 * 1024 * 1024;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(JSON_LIMIT)
            .error_handler(|err, _req| ApiError::ValidationError(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| ApiError::ValidationError(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| ApiError::ValidationError(err.to_string()).into()),
    )
    .service(
        web::scope("/v1")
            .service(health_check)
            .service(send_otp)
            .service(auth)
            .service(signin)
            .service(refresh_token)
            .service(signup)
            .service(get_profile)
            .service(edit_data)
            .service(set_password)
            .service(send_reset_otp)
            .service(reset_password)
            .service(create_appliance)
            .service(delete_appliance)
            .service(list_appliances)
            .service(create_offer)
            .service(list_all_offers)
            .service(list_my_offers)
            .service(list_map_offers)
            .service(get_offer)
            .service(update_offer)
            .service(delete_offer),
    );
}

/// Optional JSON body; an empty body means no filters.
fn parse_optional_body<T>(body: &[u8]) -> Result<T, ApiError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::ValidationError(format!("Invalid JSON body: {}", e)))
}

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

// Accounts

#[get("/send-otp")]
async fn send_otp(
    accounts: web::Data<AccountService>,
    query: web::Query<SendCodeQuery>,
) -> Result<HttpResponse, ApiError> {
    let result = accounts.request_code(&query.tg_id).await?;
    Ok(HttpResponse::Ok().json(SimpleResponse { result }))
}

#[post("/auth")]
async fn auth(
    accounts: web::Data<AccountService>,
    body: web::Json<AuthoriseRequest>,
) -> Result<HttpResponse, ApiError> {
    let tokens = accounts.authenticate_by_code(&body).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

#[post("/signin")]
async fn signin(
    accounts: web::Data<AccountService>,
    body: web::Json<SignInRequest>,
) -> Result<HttpResponse, ApiError> {
    debug!("Sign-in attempt for {}", body.username);
    let tokens = accounts.authenticate_by_password(&body).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

#[post("/refresh-token")]
async fn refresh_token(
    accounts: web::Data<AccountService>,
    subject: RefreshSubject,
) -> Result<HttpResponse, ApiError> {
    let tokens = accounts.refresh(subject.account_id).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

#[post("/signup")]
async fn signup(
    accounts: web::Data<AccountService>,
    body: web::Json<SignUpRequest>,
) -> Result<HttpResponse, ApiError> {
    accounts.register(&body).await?;
    Ok(HttpResponse::Ok().json(SimpleResponse { result: true }))
}

#[get("/profile")]
async fn get_profile(
    accounts: web::Data<AccountService>,
    caller: AuthenticatedAccount,
) -> Result<HttpResponse, ApiError> {
    let current = accounts.get_profile(caller.account_id).await?;
    Ok(HttpResponse::Ok().json(ProfileResponse { profile: current }))
}

#[put("/edit-data")]
async fn edit_data(
    accounts: web::Data<AccountService>,
    caller: AuthenticatedAccount,
    body: web::Json<EditDataRequest>,
) -> Result<HttpResponse, ApiError> {
    let updated = accounts.update_profile(caller.account_id, &body).await?;
    Ok(HttpResponse::Ok().json(ProfileResponse { profile: updated }))
}

#[put("/set-password")]
async fn set_password(
    accounts: web::Data<AccountService>,
    caller: AuthenticatedAccount,
    body: web::Json<NewPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    accounts.set_password(caller.account_id, &body).await?;
    Ok(HttpResponse::Ok().json(SimpleResponse { result: true }))
}

#[get("/send-reset-otp")]
async fn send_reset_otp(
    accounts: web::Data<AccountService>,
    query: web::Query<ResetCodeQuery>,
) -> Result<HttpResponse, ApiError> {
    let result = accounts.request_reset_code(&query.username).await?;
    Ok(HttpResponse::Ok().json(SimpleResponse { result }))
}

#[post("/reset-password")]
async fn reset_password(
    accounts: web::Data<AccountService>,
    body: web::Json<ResetPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    accounts.reset_password(&body).await?;
    Ok(HttpResponse::Ok().json(SimpleResponse { result: true }))
}

// Appliances

#[post("/offer/appliance")]
async fn create_appliance(
    appliances: web::Data<ApplianceService>,
    query: web::Query<ApplianceQuery>,
) -> Result<HttpResponse, ApiError> {
    let created = appliances.create(&query.name).await?;
    Ok(HttpResponse::Ok().json(created))
}

#[delete("/offer/appliance/{id}")]
async fn delete_appliance(
    appliances: web::Data<ApplianceService>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let removed = appliances.delete(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(removed))
}

#[get("/offer/appliances")]
async fn list_appliances(appliances: web::Data<ApplianceService>) -> Result<HttpResponse, ApiError> {
    let items = appliances.list().await?;
    Ok(HttpResponse::Ok().json(items))
}

// Offers

#[post("/offer/")]
async fn create_offer(
    offers: web::Data<OfferService>,
    caller: AuthenticatedAccount,
    body: web::Json<OfferCreate>,
) -> Result<HttpResponse, ApiError> {
    let created = offers.create_offer(caller.account_id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(created))
}

#[get("/offer/all")]
async fn list_all_offers(
    offers: web::Data<OfferService>,
    _caller: AuthenticatedAccount,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let filters: OfferFilters = parse_optional_body(&body)?;
    let found = offers.list_offers(filters).await?;
    Ok(HttpResponse::Ok().json(OfferList { offers: found }))
}

#[get("/offer/my")]
async fn list_my_offers(
    offers: web::Data<OfferService>,
    caller: AuthenticatedAccount,
) -> Result<HttpResponse, ApiError> {
    let found = offers.list_my_offers(caller.account_id).await?;
    Ok(HttpResponse::Ok().json(OfferList { offers: found }))
}

#[get("/offer/map")]
async fn list_map_offers(
    offers: web::Data<OfferService>,
    _caller: AuthenticatedAccount,
    body: web::Json<MapRequest>,
) -> Result<HttpResponse, ApiError> {
    let MapRequest { map, filters } = body.into_inner();
    let found = offers.list_offers_in_map(map, filters).await?;
    Ok(HttpResponse::Ok().json(OfferList { offers: found }))
}

#[get("/offer/one/{id}")]
async fn get_offer(
    offers: web::Data<OfferService>,
    _caller: AuthenticatedAccount,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let found = offers.get_offer(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(found))
}

#[put("/offer/{id}")]
async fn update_offer(
    offers: web::Data<OfferService>,
    caller: AuthenticatedAccount,
    path: web::Path<i32>,
    body: web::Json<OfferEdit>,
) -> Result<HttpResponse, ApiError> {
    let updated = offers
        .update_offer(caller.account_id, path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/offer/{id}")]
async fn delete_offer(
    offers: web::Data<OfferService>,
    caller: AuthenticatedAccount,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let deleted = offers.delete_offer(caller.account_id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(deleted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_body_yields_default_filters() {
        let filters: OfferFilters = parse_optional_body(b"").unwrap();
        assert!(filters.price_from.is_none());
        let filters: OfferFilters = parse_optional_body(b"  \n").unwrap();
        assert!(filters.rooms.is_empty());
    }

    #[test]
    fn body_filters_are_parsed() {
        let filters: OfferFilters = parse_optional_body(br#"{"price_to": 500, "rooms": ["Studio"]}"#).unwrap();
        assert_eq!(filters.price_to, Some(500.0));
        assert_eq!(filters.rooms, vec![Rooms::Studio]);
    }

    #[test]
    fn malformed_body_is_a_validation_error() {
        let result: Result<OfferFilters, _> = parse_optional_body(b"{not json");
        assert!(matches!(result, Err(ApiError::ValidationError(_))));
    }
}
