//! Translates a single `{action, collection, data}` request into a
//! `{success, ...}` response per §6's Catalog request schema.

use crate::error::CatalogError;
use crate::store::Catalog;
use serde::Deserialize;
use serde_json::{Map, Value, json};

#[derive(Deserialize)]
struct CatalogRequest {
    action: String,
    collection: String,
    #[serde(default)]
    data: Value,
}

fn object_field(data: &Value, key: &str) -> Map<String, Value> {
    data.get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn err_response(err: CatalogError) -> Value {
    json!({"success": false, "error": err.tag(), "message": err.to_string()})
}

/// Handles one decoded request and returns the JSON value to send back.
/// Never panics on malformed input — anything that doesn't parse as a
/// `CatalogRequest` is reported as `Invalid request`, matching the
/// behavior for an unrecognized collection.
pub async fn handle_request(catalog: &Catalog, raw: Value) -> Value {
    let request: CatalogRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(_) => return err_response(CatalogError::InvalidRequest),
    };

    match request.action.as_str() {
        "insert" => {
            let doc = request.data.as_object().cloned().unwrap_or_default();
            match catalog.insert(&request.collection, doc).await {
                Ok((id, result)) => json!({"success": true, "id": id, "result": result}),
                Err(e) => err_response(e),
            }
        }
        "find" => {
            let query = object_field(&request.data, "query");
            match catalog.find(&request.collection, &query).await {
                Ok(results) => {
                    let count = results.len();
                    json!({"success": true, "results": results, "count": count})
                }
                Err(e) => err_response(e),
            }
        }
        "find_one" => {
            let query = object_field(&request.data, "query");
            match catalog.find_one(&request.collection, &query).await {
                Ok(result) => json!({"success": true, "result": result}),
                Err(e) => err_response(e),
            }
        }
        "update" => {
            let query = object_field(&request.data, "query");
            let update = object_field(&request.data, "update");
            match catalog.update(&request.collection, &query, &update).await {
                Ok(count) => json!({"success": true, "count": count}),
                Err(e) => err_response(e),
            }
        }
        "delete" => {
            let query = object_field(&request.data, "query");
            match catalog.delete(&request.collection, &query).await {
                Ok(count) => json!({"success": true, "count": count}),
                Err(e) => err_response(e),
            }
        }
        _ => err_response(CatalogError::InvalidRequest),
    }
}
