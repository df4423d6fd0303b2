//! Request payload validation.
//!
//! # Data Flow
//! ```text
//! Raw payload (body + query + path params merged)
//!     → sanitize.rs (optional markup stripping)
//!     → schema.rs (declarative field checks, defaults, unknown keys dropped)
//!     → rules.rs (string formats: uuid, email, url, phone, password)
//!     → normalized JSON object | every field error in one pass
//! ```
//!
//! # Design Decisions
//! - Validation is a pure function of (schema, payload)
//! - No implicit coercion; a field must opt in to string-to-integer parsing
//! - Absent optional fields are omitted from the output, never set to null
//! - Schemas are registered by name; unknown names are a startup error

pub mod catalog;
pub mod rules;
pub mod sanitize;
pub mod schema;

pub use catalog::storefront_schemas;
pub use schema::{
    array_of, boolean, integer, number, object, one_of, string, string_map, Field, FieldError,
    FieldKind, Invalid, Normalized, Presence, Schema, SchemaRegistry, StringFormat,
    ValidateError,
};
