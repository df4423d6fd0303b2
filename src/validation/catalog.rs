//! Storefront request schemas.

use serde_json::json;

use crate::validation::schema::{
    array_of, boolean, integer, number, one_of, string, string_map, Schema, SchemaRegistry,
    StringFormat, StringRule,
};

pub const PAGINATION: &str = "pagination";
pub const CREATE_PRODUCT: &str = "create_product";
pub const CREATE_ORDER: &str = "create_order";
pub const CREATE_REVIEW: &str = "create_review";
pub const REGISTER_USER: &str = "register_user";
pub const FARMER_PROFILE: &str = "farmer_profile";
pub const CART_ITEM: &str = "cart_item";
pub const WISHLIST_ITEM: &str = "wishlist_item";
pub const NOTIFICATION_SETTINGS: &str = "notification_settings";
pub const ADDRESS: &str = "address";

fn uuid() -> StringRule {
    string().format(StringFormat::Uuid)
}

/// Listing query parameters. Values usually arrive as query strings, so the
/// integer fields opt in to string coercion.
pub fn pagination() -> Schema {
    Schema::new(PAGINATION)
        .with_default("page", integer().min(1).coerce_from_string(), json!(1))
        .with_default(
            "limit",
            integer().min(1).max(100).coerce_from_string(),
            json!(10),
        )
        .optional("sortBy", string())
        .with_default("sortOrder", one_of(&["asc", "desc"]), json!("desc"))
}

pub fn create_product() -> Schema {
    Schema::new(CREATE_PRODUCT)
        .required("name", string().min_len(1).max_len(100))
        .required("description", string().min_len(1).max_len(1000))
        .required("price", number().positive())
        .required("quantity", integer().min(0))
        .required("category_id", uuid())
        .optional("certification", string())
        .required("region", string())
        .optional("image_url", string().format(StringFormat::Url))
}

pub fn create_order() -> Schema {
    let item = Schema::new("order_item")
        .required("product_id", uuid())
        .required("quantity", integer().positive());

    Schema::new(CREATE_ORDER)
        .required("shipping_address", string().min_len(1))
        .required("items", array_of(item).min_items(1))
        .required("payment_method", one_of(&["card", "paypal", "bank_transfer"]))
        .optional("notes", string().max_len(500))
}

pub fn create_review() -> Schema {
    Schema::new(CREATE_REVIEW)
        .required("product_id", uuid())
        .required("rating", integer().min(1).max(5))
        .optional("comment", string().max_len(500))
}

pub fn register_user() -> Schema {
    Schema::new(REGISTER_USER)
        .required("email", string().format(StringFormat::Email))
        .required(
            "password",
            string().min_len(8).format(StringFormat::StrongPassword),
        )
        .required("first_name", string().min_len(1).max_len(50))
        .required("last_name", string().min_len(1).max_len(50))
        .optional("phone", string().format(StringFormat::Phone))
        .optional("address", string().min_len(1).max_len(200))
}

pub fn farmer_profile() -> Schema {
    Schema::new(FARMER_PROFILE)
        .required("farm_name", string().min_len(1).max_len(100))
        .required("description", string().min_len(1).max_len(1000))
        .required("region", string())
        .optional("certification", string())
}

pub fn cart_item() -> Schema {
    Schema::new(CART_ITEM)
        .required("product_id", uuid())
        .required("quantity", integer().positive())
        .optional("selected_variant", string_map())
}

pub fn wishlist_item() -> Schema {
    Schema::new(WISHLIST_ITEM).required("product_id", uuid())
}

pub fn notification_settings() -> Schema {
    Schema::new(NOTIFICATION_SETTINGS)
        .required("email_notifications", boolean())
        .required("push_notifications", boolean())
        .required("order_updates", boolean())
        .required("marketing_emails", boolean())
        .required("price_alerts", boolean())
}

pub fn address() -> Schema {
    Schema::new(ADDRESS)
        .required("street", string().min_len(1))
        .required("city", string().min_len(1))
        .required("state", string().min_len(1))
        .required("postal_code", string().min_len(1))
        .required("country", string().min_len(1))
        .optional("is_default", boolean())
        .optional("label", string())
}

/// Every storefront schema, registered by name.
pub fn storefront_schemas() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    for schema in [
        pagination(),
        create_product(),
        create_order(),
        create_review(),
        register_user(),
        farmer_profile(),
        cart_item(),
        wishlist_item(),
        notification_settings(),
        address(),
    ] {
        registry.register(schema);
    }
    registry
}
