//! Offers, appliances, search and listing assembly.
//!
//! A listing set is assembled with a fixed number of queries: the filtered
//! offers, their owners, and their appliance links joined with the
//! appliances. The parts are grouped by offer id in memory.

use diesel::pg::Pg;
use diesel::prelude::*;
use log::{debug, info, warn};
use std::collections::HashMap;

use crate::config::DbPool;
use crate::db::{self, is_unique_violation};
use crate::errors::ApiError;
use crate::geocoder::{AddressData, Geocoder};
use crate::images::{decode_payload, DecodedImage, ImageStore};
use crate::models::*;
use crate::schema::{appliance, appliances_map, customer, offer};

pub type BoxedOfferQuery = offer::BoxedQuery<'static, Pg>;

/// Conjunction of every active filter, plus the map rectangle when given.
/// No active filter means every offer.
pub fn offer_filter_query(filters: &OfferFilters, bounds: Option<&MapBounds>) -> BoxedOfferQuery {
    let mut query = offer::table.order(offer::id.asc()).into_boxed();

    if let Some(kind) = filters.offer_type {
        query = query.filter(offer::offer_type.eq(kind));
    }
    if let Some(from) = filters.price_from {
        query = query.filter(offer::price.ge(from));
    }
    if let Some(to) = filters.price_to {
        query = query.filter(offer::price.le(to));
    }
    if !filters.rooms.is_empty() {
        query = query.filter(offer::rooms.eq_any(filters.rooms.clone()));
    }
    if let Some(from) = filters.area_from {
        query = query.filter(offer::area.ge(from));
    }
    if let Some(to) = filters.area_to {
        query = query.filter(offer::area.le(to));
    }
    if let Some(from) = filters.floor_from {
        query = query.filter(offer::floor.ge(from));
    }
    if let Some(to) = filters.floor_to {
        query = query.filter(offer::floor.le(to));
    }
    if !filters.renovation.is_empty() {
        query = query.filter(offer::renovation.eq_any(filters.renovation.clone()));
    }
    if !filters.appliance.is_empty() {
        // ANY-match: linked to at least one of the listed appliances
        let linked = appliances_map::table
            .filter(appliances_map::appliance_id.eq_any(filters.appliance.clone()))
            .select(appliances_map::offer_id);
        query = query.filter(offer::id.eq_any(linked));
    }
    if let Some(bounds) = bounds {
        let (min, max) = (bounds.coordinates_min, bounds.coordinates_max);
        query = query
            .filter(offer::lon.between(min.lon, max.lon))
            .filter(offer::lat.between(min.lat, max.lat));
    }

    query
}

/// Groups `(offer_id, appliance)` rows by offer, preserving row order.
pub fn group_appliances(rows: Vec<(i32, Appliance)>) -> HashMap<i32, Vec<Appliance>> {
    let mut grouped: HashMap<i32, Vec<Appliance>> = HashMap::new();
    for (offer_id, item) in rows {
        grouped.entry(offer_id).or_default().push(item);
    }
    grouped
}

/// Removes repeated ids, keeping first occurrences in order.
pub fn distinct_ids(ids: &[i32]) -> Vec<i32> {
    let mut seen = std::collections::HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Offer row with its owner and appliances, images not yet encoded.
pub type ListingParts = (Offer, OfferOwner, Vec<Appliance>);

/// Loads owners and appliances for `offers` in two queries.
fn load_listing_parts(conn: &mut PgConnection, offers: Vec<Offer>) -> Result<Vec<ListingParts>, ApiError> {
    if offers.is_empty() {
        return Ok(Vec::new());
    }

    let offer_ids: Vec<i32> = offers.iter().map(|o| o.id).collect();
    let owner_ids = distinct_ids(&offers.iter().map(|o| o.user_id).collect::<Vec<_>>());

    let owners: HashMap<i32, OfferOwner> = customer::table
        .filter(customer::id.eq_any(owner_ids))
        .select((
            customer::id,
            customer::name,
            customer::tg_username,
            customer::phone,
            customer::email,
        ))
        .load::<OfferOwner>(conn)?
        .into_iter()
        .map(|owner| (owner.id, owner))
        .collect();

    let links = appliances_map::table
        .inner_join(appliance::table)
        .filter(appliances_map::offer_id.eq_any(offer_ids))
        .order(appliances_map::id.asc())
        .select((appliances_map::offer_id, (appliance::id, appliance::name)))
        .load::<(i32, Appliance)>(conn)?;
    let mut appliances = group_appliances(links);

    offers
        .into_iter()
        .map(|row| {
            let owner = owners.get(&row.user_id).cloned().ok_or_else(|| {
                ApiError::InternalError(format!("Owner {} of offer {} is missing", row.user_id, row.id))
            })?;
            let linked = appliances.remove(&row.id).unwrap_or_default();
            Ok((row, owner, linked))
        })
        .collect()
}

fn find_offer(conn: &mut PgConnection, offer_id: i32) -> Result<Offer, ApiError> {
    offer::table
        .find(offer_id)
        .first::<Offer>(conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFoundError("Offer not found".to_string()))
}

fn find_owned_offer(conn: &mut PgConnection, offer_id: i32, requester_id: i32) -> Result<Offer, ApiError> {
    let row = find_offer(conn, offer_id)?;
    if row.user_id != requester_id {
        debug!("Account {} is not the owner of offer {}", requester_id, offer_id);
        return Err(ApiError::ForbiddenError("Not the owner of this offer".to_string()));
    }
    Ok(row)
}

/// Fails with NotFound unless every id names an existing appliance.
fn check_appliances_exist(conn: &mut PgConnection, ids: &[i32]) -> Result<(), ApiError> {
    if ids.is_empty() {
        return Ok(());
    }
    let found: i64 = appliance::table
        .filter(appliance::id.eq_any(ids.to_vec()))
        .count()
        .get_result(conn)?;
    if found != ids.len() as i64 {
        return Err(ApiError::NotFoundError("Appliance not found".to_string()));
    }
    Ok(())
}

fn link_appliances(conn: &mut PgConnection, offer_id: i32, ids: &[i32]) -> Result<(), ApiError> {
    let links: Vec<NewApplianceLink> = ids
        .iter()
        .map(|&appliance_id| NewApplianceLink { appliance_id, offer_id })
        .collect();
    if !links.is_empty() {
        diesel::insert_into(appliances_map::table)
            .values(&links)
            .execute(conn)?;
    }
    Ok(())
}

fn decode_optional(payload: Option<&str>) -> Result<Option<DecodedImage>, ApiError> {
    payload.map(decode_payload).transpose().map_err(Into::into)
}

#[derive(Clone)]
pub struct ApplianceService {
    pool: DbPool,
}

impl ApplianceService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str) -> Result<Appliance, ApiError> {
        let new_appliance = NewAppliance { name: name.trim().to_string() };
        if new_appliance.name.is_empty() {
            return Err(ApiError::ValidationError("Appliance name must not be empty".to_string()));
        }

        let created = db::run(&self.pool, move |conn| {
            diesel::insert_into(appliance::table)
                .values(&new_appliance)
                .get_result::<Appliance>(conn)
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ApiError::ValidationError("Appliance with this name already exists".to_string())
                    } else {
                        e.into()
                    }
                })
        })
        .await?;

        info!("Created appliance {} ({})", created.id, created.name);
        Ok(created)
    }

    pub async fn delete(&self, appliance_id: i32) -> Result<Appliance, ApiError> {
        let deleted = db::run(&self.pool, move |conn| {
            Ok(diesel::delete(appliance::table.find(appliance_id))
                .get_result::<Appliance>(conn)
                .optional()?)
        })
        .await?
        .ok_or_else(|| ApiError::NotFoundError("Appliance not found".to_string()))?;

        info!("Deleted appliance {}", appliance_id);
        Ok(deleted)
    }

    pub async fn list(&self) -> Result<Vec<Appliance>, ApiError> {
        db::run(&self.pool, |conn| {
            Ok(appliance::table
                .order(appliance::id.asc())
                .load::<Appliance>(conn)?)
        })
        .await
    }
}

/// Listing lifecycle and search.
#[derive(Clone)]
pub struct OfferService {
    pool: DbPool,
    geocoder: Geocoder,
    images: ImageStore,
}

impl OfferService {
    pub fn new(pool: DbPool, geocoder: Geocoder, images: ImageStore) -> Self {
        Self { pool, geocoder, images }
    }

    async fn encode(&self, parts: ListingParts) -> Result<OfferResponse, ApiError> {
        let (row, owner, linked) = parts;
        let images = self.images.load_slots(row.image_paths()).await?;
        Ok(OfferResponse::assemble(row, owner, linked, images))
    }

    async fn encode_all(&self, parts: Vec<ListingParts>) -> Result<Vec<OfferResponse>, ApiError> {
        let mut responses = Vec::with_capacity(parts.len());
        for part in parts {
            responses.push(self.encode(part).await?);
        }
        Ok(responses)
    }

    /// Writes each present image, removing the already written ones if any fails.
    async fn store_images(&self, images: Vec<Option<DecodedImage>>) -> Result<Vec<Option<String>>, ApiError> {
        let mut stored: Vec<Option<String>> = Vec::with_capacity(images.len());
        for image in images {
            match image {
                Some(image) => match self.images.save(&image).await {
                    Ok(path) => stored.push(Some(path)),
                    Err(e) => {
                        self.discard_images(stored.iter().flatten()).await;
                        return Err(e.into());
                    }
                },
                None => stored.push(None),
            }
        }
        Ok(stored)
    }

    async fn discard_images<'a>(&self, paths: impl Iterator<Item = &'a String>) {
        for path in paths {
            self.images.remove(path).await;
        }
    }

    async fn query(&self, filters: OfferFilters, bounds: Option<MapBounds>) -> Result<Vec<OfferResponse>, ApiError> {
        let parts = db::run(&self.pool, move |conn| {
            let rows = offer_filter_query(&filters, bounds.as_ref()).load::<Offer>(conn)?;
            load_listing_parts(conn, rows)
        })
        .await?;
        debug!("Offer query matched {} offers", parts.len());
        self.encode_all(parts).await
    }

    pub async fn create_offer(&self, owner_id: i32, data: OfferCreate) -> Result<OfferResponse, ApiError> {
        let decoded = vec![
            Some(decode_payload(&data.img1)?),
            decode_optional(data.img2.as_deref())?,
            decode_optional(data.img3.as_deref())?,
        ];
        let address: AddressData = self.geocoder.resolve(&data.address).await;
        let stored = self.store_images(decoded).await?;
        let appliance_ids = distinct_ids(&data.appliances);

        let new_offer = NewOffer {
            user_id: owner_id,
            img1: stored[0].clone().unwrap_or_default(),
            img2: stored[1].clone(),
            img3: stored[2].clone(),
            address: data.address,
            country: address.country,
            lon: address.lon,
            lat: address.lat,
            title: data.title,
            description: data.description,
            offer_type: data.offer_type,
            rooms: data.rooms,
            price: data.price,
            area: data.area,
            floor: data.floor,
            renovation: data.renovation,
        };

        let result = db::run(&self.pool, move |conn| {
            conn.transaction::<_, ApiError, _>(|conn| {
                check_appliances_exist(conn, &appliance_ids)?;
                let created = diesel::insert_into(offer::table)
                    .values(&new_offer)
                    .get_result::<Offer>(conn)?;
                link_appliances(conn, created.id, &appliance_ids)?;
                Ok(created)
            })
            .and_then(|created| load_listing_parts(conn, vec![created]))
        })
        .await;

        let mut parts = match result {
            Ok(parts) => parts,
            Err(e) => {
                self.discard_images(stored.iter().flatten()).await;
                return Err(e);
            }
        };
        let part = parts
            .pop()
            .ok_or_else(|| ApiError::InternalError("Created offer vanished".to_string()))?;
        info!("Account {} created offer {}", owner_id, part.0.id);
        self.encode(part).await
    }

    /// Full replacement by the owner; absent image slots keep their image.
    pub async fn update_offer(&self, requester_id: i32, offer_id: i32, data: OfferEdit) -> Result<OfferResponse, ApiError> {
        let decoded = vec![
            decode_optional(data.img1.as_deref())?,
            decode_optional(data.img2.as_deref())?,
            decode_optional(data.img3.as_deref())?,
        ];

        let current = db::run(&self.pool, move |conn| find_owned_offer(conn, offer_id, requester_id)).await?;

        let address = if current.address == data.address {
            AddressData { country: current.country.clone(), lon: current.lon, lat: current.lat }
        } else {
            self.geocoder.resolve(&data.address).await
        };

        let stored = self.store_images(decoded).await?;
        let previous = [Some(current.img1.clone()), current.img2.clone(), current.img3.clone()];
        let replaced: Vec<String> = stored
            .iter()
            .zip(previous.iter())
            .filter_map(|(new, old)| match (new, old) {
                (Some(_), Some(old)) => Some(old.clone()),
                _ => None,
            })
            .collect();
        let pick = |slot: usize| stored[slot].clone().or_else(|| previous[slot].clone());

        let changes = NewOffer {
            user_id: current.user_id,
            img1: pick(0).unwrap_or_default(),
            img2: pick(1),
            img3: pick(2),
            address: data.address,
            country: address.country,
            lon: address.lon,
            lat: address.lat,
            title: data.title,
            description: data.description,
            offer_type: data.offer_type,
            rooms: data.rooms,
            price: data.price,
            area: data.area,
            floor: data.floor,
            renovation: data.renovation,
        };
        let appliance_ids = distinct_ids(&data.appliances);

        let result = db::run(&self.pool, move |conn| {
            conn.transaction::<_, ApiError, _>(|conn| {
                find_owned_offer(conn, offer_id, requester_id)?;
                check_appliances_exist(conn, &appliance_ids)?;
                let updated = diesel::update(offer::table.find(offer_id))
                    .set(&changes)
                    .get_result::<Offer>(conn)?;
                diesel::delete(appliances_map::table.filter(appliances_map::offer_id.eq(offer_id)))
                    .execute(conn)?;
                link_appliances(conn, offer_id, &appliance_ids)?;
                Ok(updated)
            })
            .and_then(|updated| load_listing_parts(conn, vec![updated]))
        })
        .await;

        let mut parts = match result {
            Ok(parts) => parts,
            Err(e) => {
                self.discard_images(stored.iter().flatten()).await;
                return Err(e);
            }
        };
        self.discard_images(replaced.iter()).await;

        let part = parts
            .pop()
            .ok_or_else(|| ApiError::InternalError("Updated offer vanished".to_string()))?;
        info!("Account {} updated offer {}", requester_id, offer_id);
        self.encode(part).await
    }

    /// Deletes an owned offer together with its appliance links and images.
    pub async fn delete_offer(&self, requester_id: i32, offer_id: i32) -> Result<OfferResponse, ApiError> {
        let part = db::run(&self.pool, move |conn| {
            conn.transaction::<_, ApiError, _>(|conn| {
                let row = find_owned_offer(conn, offer_id, requester_id)?;
                let mut parts = load_listing_parts(conn, vec![row])?;
                diesel::delete(appliances_map::table.filter(appliances_map::offer_id.eq(offer_id)))
                    .execute(conn)?;
                diesel::delete(offer::table.find(offer_id)).execute(conn)?;
                parts
                    .pop()
                    .ok_or_else(|| ApiError::InternalError("Deleted offer vanished".to_string()))
            })
        })
        .await?;

        let paths: Vec<String> = part.0.image_paths().iter().flatten().map(|p| p.to_string()).collect();
        let response = self.encode(part).await;
        if let Err(e) = &response {
            warn!("Offer {} deleted but its images could not be encoded: {}", offer_id, e);
        }
        self.discard_images(paths.iter()).await;

        info!("Account {} deleted offer {}", requester_id, offer_id);
        response
    }

    pub async fn get_offer(&self, offer_id: i32) -> Result<OfferResponse, ApiError> {
        let mut parts = db::run(&self.pool, move |conn| {
            let row = find_offer(conn, offer_id)?;
            load_listing_parts(conn, vec![row])
        })
        .await?;
        let part = parts
            .pop()
            .ok_or_else(|| ApiError::NotFoundError("Offer not found".to_string()))?;
        self.encode(part).await
    }

    pub async fn list_offers(&self, filters: OfferFilters) -> Result<Vec<OfferResponse>, ApiError> {
        self.query(filters, None).await
    }

    pub async fn list_offers_in_map(&self, bounds: MapBounds, filters: OfferFilters) -> Result<Vec<OfferResponse>, ApiError> {
        self.query(filters, Some(bounds)).await
    }

    pub async fn list_my_offers(&self, owner_id: i32) -> Result<Vec<OfferResponse>, ApiError> {
        let parts = db::run(&self.pool, move |conn| {
            let rows = offer::table
                .filter(offer::user_id.eq(owner_id))
                .order(offer::id.asc())
                .load::<Offer>(conn)?;
            load_listing_parts(conn, rows)
        })
        .await?;
        self.encode_all(parts).await
    }
}
