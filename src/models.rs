use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Declares a closed set of string values stored in a `VARCHAR` column and
/// exchanged verbatim over JSON. Extra literals after `|` are accepted on input.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, diesel::AsExpression, diesel::FromSqlRow)]
        #[diesel(sql_type = Text)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text $(| $alias)* => Ok($name::$variant),)+
                    other => Err(format!("unknown {} value: {}", stringify!($name), other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                raw.parse().map_err(Into::into)
            }
        }
    };
}

text_enum! {
    /// Account role. Partners are stored as `client`.
    Role {
        Admin => "admin",
        Partner => "client" | "partner",
    }
}

text_enum! {
    OfferType {
        Apartment => "Apartment",
        Room => "Room",
        House => "House",
    }
}

text_enum! {
    Rooms {
        Studio => "Studio",
        FreePlanning => "Free planing",
        One => "1",
        Two => "2",
        Three => "3",
        Four => "4",
        Five => "5",
        SixPlus => "6+",
    }
}

text_enum! {
    Renovation {
        Any => "Any",
        Without => "Without renovation",
        Cosmetic => "Cosmetic renovation",
        Euro => "Euro renovation",
        Designer => "Designer renovation",
    }
}

// Entities

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::customer)]
pub struct Account {
    pub id: i32,
    pub role: Role,
    pub name: String,
    pub tg_id: String,
    pub tg_username: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub status: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::customer)]
pub struct NewAccount {
    pub role: Role,
    pub name: String,
    pub tg_id: String,
    pub tg_username: String,
    pub status: i32,
}

#[derive(AsChangeset, Debug, Clone)]
#[diesel(table_name = crate::schema::customer, treat_none_as_null = true)]
pub struct AccountChanges {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub tg_username: String,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::appliance)]
pub struct Appliance {
    pub id: i32,
    pub name: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::appliance)]
pub struct NewAppliance {
    pub name: String,
}

#[derive(Insertable, Debug, Clone, Copy)]
#[diesel(table_name = crate::schema::appliances_map)]
pub struct NewApplianceLink {
    pub appliance_id: i32,
    pub offer_id: i32,
}

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct Offer {
    pub id: i32,
    pub user_id: i32,
    pub img1: String,
    pub img2: Option<String>,
    pub img3: Option<String>,
    pub address: String,
    pub country: Option<String>,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
    pub title: String,
    pub description: String,
    pub offer_type: OfferType,
    pub rooms: Rooms,
    pub price: f64,
    pub area: f64,
    pub floor: i32,
    pub renovation: Renovation,
}

impl Offer {
    /// Stored image paths in slot order.
    pub fn image_paths(&self) -> [Option<&str>; 3] {
        [Some(self.img1.as_str()), self.img2.as_deref(), self.img3.as_deref()]
    }
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = crate::schema::offer, treat_none_as_null = true)]
pub struct NewOffer {
    pub user_id: i32,
    pub img1: String,
    pub img2: Option<String>,
    pub img3: Option<String>,
    pub address: String,
    pub country: Option<String>,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
    pub title: String,
    pub description: String,
    pub offer_type: OfferType,
    pub rooms: Rooms,
    pub price: f64,
    pub area: f64,
    pub floor: i32,
    pub renovation: Renovation,
}

/// Public projection of an offer's owner.
#[derive(Queryable, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OfferOwner {
    #[serde(skip)]
    pub id: i32,
    pub name: String,
    pub tg_username: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

// Account DTOs

#[derive(Deserialize, Debug)]
pub struct SendCodeQuery {
    pub tg_id: String,
}

#[derive(Deserialize, Debug)]
pub struct AuthoriseRequest {
    pub tg_id: String,
    pub code: u32,
}

#[derive(Deserialize, Debug)]
pub struct SignInRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SignUpRequest {
    pub role: Role,
    pub name: String,
    pub tg_id: String,
    pub tg_username: String,
}

#[derive(Deserialize, Debug)]
pub struct NewPasswordRequest {
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Deserialize, Debug)]
pub struct ResetCodeQuery {
    pub username: String,
}

#[derive(Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub username: String,
    pub code: u32,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Deserialize, Debug)]
pub struct EditDataRequest {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub username: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct SimpleResponse {
    pub result: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub customer_id: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Profile {
    pub id: i32,
    pub role: Role,
    pub phone: Option<String>,
    pub username: String,
    pub tg_id: String,
    pub name: String,
    pub email: Option<String>,
    pub status: i32,
}

impl From<&Account> for Profile {
    fn from(account: &Account) -> Self {
        Profile {
            id: account.id,
            role: account.role,
            phone: account.phone.clone(),
            username: account.tg_username.clone(),
            tg_id: account.tg_id.clone(),
            name: account.name.clone(),
            email: account.email.clone(),
            status: account.status,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ProfileResponse {
    pub profile: Profile,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Claims {
    pub sub: String,      // Subject (account id)
    pub exp: usize,       // Expiration time
    pub iat: usize,       // Issued at
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub jti: String,
}

// Offer DTOs

#[derive(Deserialize, Debug)]
pub struct ApplianceQuery {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OfferCreate {
    pub img1: String,
    pub img2: Option<String>,
    pub img3: Option<String>,
    pub address: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub offer_type: OfferType,
    pub rooms: Rooms,
    pub price: f64,
    pub area: f64,
    pub floor: i32,
    pub renovation: Renovation,
    #[serde(default)]
    pub appliances: Vec<i32>,
}

/// Full replacement of an offer. Image slots left out keep the stored image.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OfferEdit {
    pub img1: Option<String>,
    pub img2: Option<String>,
    pub img3: Option<String>,
    pub address: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub offer_type: OfferType,
    pub rooms: Rooms,
    pub price: f64,
    pub area: f64,
    pub floor: i32,
    pub renovation: Renovation,
    #[serde(default)]
    pub appliances: Vec<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OfferResponse {
    pub id: i32,
    pub img1: String,
    pub img2: Option<String>,
    pub img3: Option<String>,
    pub address: String,
    pub country: Option<String>,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub offer_type: OfferType,
    pub rooms: Rooms,
    pub price: f64,
    pub area: f64,
    pub floor: i32,
    pub renovation: Renovation,
    pub appliances: Vec<Appliance>,
    pub owner: OfferOwner,
}

impl OfferResponse {
    /// Builds the response from an offer row, its owner, its appliances and
    /// the already encoded images of its three slots.
    pub fn assemble(
        offer: Offer,
        owner: OfferOwner,
        appliances: Vec<Appliance>,
        images: [Option<String>; 3],
    ) -> Self {
        let [img1, img2, img3] = images;
        OfferResponse {
            id: offer.id,
            img1: img1.unwrap_or_default(),
            img2,
            img3,
            address: offer.address,
            country: offer.country,
            lon: offer.lon,
            lat: offer.lat,
            title: offer.title,
            description: offer.description,
            offer_type: offer.offer_type,
            rooms: offer.rooms,
            price: offer.price,
            area: offer.area,
            floor: offer.floor,
            renovation: offer.renovation,
            appliances,
            owner,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct OfferList {
    pub offers: Vec<OfferResponse>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct OfferFilters {
    #[serde(rename = "type")]
    pub offer_type: Option<OfferType>,
    pub price_from: Option<f64>,
    pub price_to: Option<f64>,
    pub rooms: Vec<Rooms>,
    pub area_from: Option<f64>,
    pub area_to: Option<f64>,
    pub floor_from: Option<i32>,
    pub floor_to: Option<i32>,
    pub appliance: Vec<i32>,
    pub renovation: Vec<Renovation>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lon: f64,
    pub lat: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MapBounds {
    pub coordinates_min: Coordinates,
    pub coordinates_max: Coordinates,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MapRequest {
    pub map: MapBounds,
    #[serde(default)]
    pub filters: OfferFilters,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enums_use_wire_values() {
        assert_eq!(serde_json::to_value(Rooms::FreePlanning).unwrap(), json!("Free planing"));
        assert_eq!(serde_json::to_value(Rooms::SixPlus).unwrap(), json!("6+"));
        assert_eq!(serde_json::to_value(Renovation::Euro).unwrap(), json!("Euro renovation"));
        assert_eq!(serde_json::to_value(Role::Partner).unwrap(), json!("client"));
        for rooms in Rooms::ALL {
            assert_eq!(rooms.as_str().parse::<Rooms>().unwrap(), *rooms);
        }
    }

    #[test]
    fn role_accepts_partner_alias() {
        assert_eq!("partner".parse::<Role>().unwrap(), Role::Partner);
        assert_eq!("client".parse::<Role>().unwrap(), Role::Partner);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn filters_default_when_fields_missing() {
        let filters: OfferFilters = serde_json::from_value(json!({ "price_from": 100.0 })).unwrap();
        assert_eq!(filters.price_from, Some(100.0));
        assert!(filters.rooms.is_empty());
        assert!(filters.appliance.is_empty());
        assert!(filters.offer_type.is_none());
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let result: Result<OfferFilters, _> = serde_json::from_value(json!({ "type": "Castle" }));
        assert!(result.is_err());
    }

    #[test]
    fn map_request_filters_are_optional() {
        let request: MapRequest = serde_json::from_value(json!({
            "map": {
                "coordinates_min": { "lon": 37.0, "lat": 55.0 },
                "coordinates_max": { "lon": 38.0, "lat": 56.0 }
            }
        }))
        .unwrap();
        assert_eq!(request.map.coordinates_max.lat, 56.0);
        assert!(request.filters.renovation.is_empty());
    }

    #[test]
    fn assembled_offer_has_public_owner_only() {
        let offer = Offer {
            id: 7,
            user_id: 3,
            img1: "images/a.png".into(),
            img2: None,
            img3: None,
            address: "Moscow".into(),
            country: None,
            lon: None,
            lat: None,
            title: "Flat".into(),
            description: "Nice".into(),
            offer_type: OfferType::Apartment,
            rooms: Rooms::Two,
            price: 150.0,
            area: 42.5,
            floor: 3,
            renovation: Renovation::Cosmetic,
        };
        let owner = OfferOwner {
            id: 3,
            name: "Ann".into(),
            tg_username: "ann".into(),
            phone: Some("79001234567".into()),
            email: None,
        };
        let response = OfferResponse::assemble(
            offer,
            owner,
            vec![Appliance { id: 1, name: "Fridge".into() }],
            [Some("AAEC".into()), None, None],
        );

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["type"], "Apartment");
        assert_eq!(value["img1"], "AAEC");
        assert!(value["img2"].is_null());
        assert!(value["lat"].is_null());
        assert_eq!(value["appliances"][0]["name"], "Fridge");
        assert_eq!(
            value["owner"],
            json!({ "name": "Ann", "tg_username": "ann", "phone": "79001234567", "email": null })
        );
    }
}
