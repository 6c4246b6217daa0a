// Diesel table definitions. Kept in sync with the DDL in repository/context.rs.

diesel::table! {
    scanned_urls (id) {
        id -> Text,
        url -> Text,
        user_id -> Text,
        html_snapshot -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    processing_jobs (id) {
        id -> Text,
        scanned_url_id -> Text,
        status -> Text,
        attempts -> Integer,
        last_attempted_at -> Nullable<Text>,
        error_message -> Nullable<Text>,
        error_kind -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    receipts (id) {
        id -> Text,
        scanned_url_id -> Text,
        user_id -> Text,
        receipt_date -> Nullable<Text>,
        total_amount -> Nullable<Double>,
        store_name -> Nullable<Text>,
        uid -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    receipt_items (id) {
        id -> Integer,
        receipt_id -> Text,
        name -> Text,
        quantity -> Double,
        price -> Double,
        unit_price -> Nullable<Double>,
        vat_percentage -> Nullable<Double>,
    }
}

diesel::table! {
    pending_scans (id) {
        id -> Integer,
        url -> Text,
        html_snapshot -> Nullable<Text>,
        user_id -> Nullable<Text>,
        captured_at -> Text,
    }
}

diesel::joinable!(processing_jobs -> scanned_urls (scanned_url_id));
diesel::joinable!(receipt_items -> receipts (receipt_id));

diesel::allow_tables_to_appear_in_same_query!(
    scanned_urls,
    processing_jobs,
    receipts,
    receipt_items,
);
