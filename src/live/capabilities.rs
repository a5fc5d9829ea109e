//! Function declarations advertised to the upstream model.
//!
//! The model may call any of these; only the names in [`HANDLED_FUNCTIONS`]
//! have a consumer-side handler. The rest are acknowledged like every other
//! call and otherwise ignored by the dispatcher.

use serde_json::{json, Value};

pub const HANDLED_FUNCTIONS: [&str; 3] = ["show_umkm_details", "navigate_to_umkm", "highlight_umkm"];

fn declaration(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": description,
        "parameters": {
            "type": "OBJECT",
            "properties": properties,
            "required": required
        }
    })
}

pub fn function_declarations() -> Vec<Value> {
    vec![
        declaration(
            "search_umkm",
            "Search local businesses (UMKM) by keyword, optionally filtered by category.",
            json!({
                "query": { "type": "STRING", "description": "Search keywords" },
                "category": { "type": "STRING", "description": "Optional category filter" },
                "limit": { "type": "INTEGER", "description": "Maximum number of results" }
            }),
            &["query"],
        ),
        declaration(
            "show_umkm_details",
            "Open the detail panel of a business from the current results and optionally focus the map on it.",
            json!({
                "umkm_id": { "type": "STRING", "description": "Id of the business from the provided results" },
                "focus_map": { "type": "BOOLEAN", "description": "Move the map camera to the business (default true)" }
            }),
            &["umkm_id"],
        ),
        declaration(
            "navigate_to_umkm",
            "Start navigation to a business, by id from the results or by name and coordinates.",
            json!({
                "umkm_id": { "type": "STRING", "description": "Id of the business from the provided results" },
                "umkm_name": { "type": "STRING", "description": "Business name when no id is known" },
                "coordinates": {
                    "type": "OBJECT",
                    "properties": {
                        "lat": { "type": "NUMBER" },
                        "lon": { "type": "NUMBER" }
                    }
                }
            }),
            &[],
        ),
        declaration(
            "highlight_umkm",
            "Visually emphasise several businesses on the map and optionally zoom to fit them.",
            json!({
                "umkm_ids": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                    "description": "Ids of the businesses to highlight"
                },
                "zoom_to_bounds": { "type": "BOOLEAN", "description": "Fit the map to the highlighted businesses (default true)" }
            }),
            &["umkm_ids"],
        ),
        declaration(
            "set_category_filter",
            "Filter the map markers to one business category.",
            json!({
                "category": { "type": "STRING", "description": "Category name, or 'all' to clear" }
            }),
            &["category"],
        ),
        declaration(
            "find_nearby_umkm",
            "Find businesses near the user's location.",
            json!({
                "radius_km": { "type": "NUMBER", "description": "Search radius in kilometres" },
                "category": { "type": "STRING", "description": "Optional category filter" }
            }),
            &[],
        ),
        declaration(
            "open_chat_with_umkm",
            "Open a chat conversation with a business owner.",
            json!({
                "umkm_id": { "type": "STRING" },
                "initial_message": { "type": "STRING" }
            }),
            &["umkm_id"],
        ),
        declaration(
            "get_umkm_operational_hours",
            "Get the opening hours of a business.",
            json!({
                "umkm_id": { "type": "STRING" }
            }),
            &["umkm_id"],
        ),
        declaration(
            "compare_umkm",
            "Compare several businesses side by side.",
            json!({
                "umkm_ids": { "type": "ARRAY", "items": { "type": "STRING" } },
                "aspects": { "type": "ARRAY", "items": { "type": "STRING" } }
            }),
            &["umkm_ids"],
        ),
        declaration(
            "show_umkm_reviews",
            "Show customer reviews of a business.",
            json!({
                "umkm_id": { "type": "STRING" },
                "limit": { "type": "INTEGER" }
            }),
            &["umkm_id"],
        ),
        declaration(
            "get_umkm_catalog",
            "Show the product catalog of a business.",
            json!({
                "umkm_id": { "type": "STRING" },
                "category": { "type": "STRING" }
            }),
            &["umkm_id"],
        ),
        declaration(
            "show_user_location",
            "Center the map on the user's current location.",
            json!({
                "zoom": { "type": "NUMBER" }
            }),
            &[],
        ),
        declaration(
            "change_map_mode",
            "Switch the base map style.",
            json!({
                "mode": {
                    "type": "STRING",
                    "enum": ["streets", "satellite", "dark", "light"]
                }
            }),
            &["mode"],
        ),
        declaration(
            "search_umkm_by_embedding",
            "Run a semantic search over business descriptions.",
            json!({
                "query": { "type": "STRING" },
                "top_k": { "type": "INTEGER" }
            }),
            &["query"],
        ),
    ]
}
