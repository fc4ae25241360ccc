// Database schema definitions
diesel::table! {
    customer (id) {
        id -> Int4,
        role -> Varchar,
        name -> Varchar,
        tg_id -> Varchar,
        tg_username -> Varchar,
        phone -> Nullable<Varchar>,
        email -> Nullable<Varchar>,
        password -> Nullable<Varchar>,
        status -> Int4,
    }
}

diesel::table! {
    offer (id) {
        id -> Int4,
        user_id -> Int4,
        img1 -> Varchar,
        img2 -> Nullable<Varchar>,
        img3 -> Nullable<Varchar>,
        address -> Varchar,
        country -> Nullable<Varchar>,
        lon -> Nullable<Float8>,
        lat -> Nullable<Float8>,
        title -> Varchar,
        description -> Varchar,
        #[sql_name = "type"]
        offer_type -> Varchar,
        rooms -> Varchar,
        price -> Float8,
        area -> Float8,
        floor -> Int4,
        renovation -> Varchar,
    }
}

diesel::table! {
    appliance (id) {
        id -> Int4,
        name -> Varchar,
    }
}

diesel::table! {
    appliances_map (id) {
        id -> Int4,
        appliance_id -> Int4,
        offer_id -> Int4,
    }
}

diesel::joinable!(offer -> customer (user_id));
diesel::joinable!(appliances_map -> appliance (appliance_id));
diesel::joinable!(appliances_map -> offer (offer_id));

diesel::allow_tables_to_appear_in_same_query!(
    customer, offer, appliance, appliances_map,
);
