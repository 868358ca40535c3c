use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::StoreError;
use crate::util::http;

use super::auth::ServiceAccountTokens;
use super::{Document, DocumentStore};

const FIRESTORE_API: &str = "https://firestore.googleapis.com/v1";

/// Cloud Firestore over the REST v1 API.
pub struct FirestoreStore {
    documents_url: String,
    tokens: ServiceAccountTokens,
}

impl FirestoreStore {
    pub fn new(project_id: String, database: String, tokens: ServiceAccountTokens) -> Self {
        Self {
            documents_url: format!(
                "{FIRESTORE_API}/projects/{project_id}/databases/{database}/documents"
            ),
            tokens,
        }
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.documents_url,
            urlencoding::encode(collection),
            urlencoding::encode(id)
        )
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let token = self.tokens.access_token().await?;
        let resp = http::client()
            .get(self.document_url(collection, id))
            .bearer_auth(token)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = resp.json().await?;
        let fields = body.get("fields").cloned().unwrap_or_else(|| json!({}));
        decode_fields(&fields).map(Some)
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        merge: bool,
    ) -> Result<(), StoreError> {
        let token = self.tokens.access_token().await?;
        let mut request = http::client()
            .patch(self.document_url(collection, id))
            .bearer_auth(token);

        if merge {
            let mask: Vec<(&str, String)> = fields
                .keys()
                .map(|name| ("updateMask.fieldPaths", quote_field_path(name)))
                .collect();
            request = request.query(&mask);
        }

        let resp = request
            .json(&json!({ "fields": encode_fields(&fields) }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!("Firestore wrote {}/{} (merge: {})", collection, id, merge);
        Ok(())
    }

    fn name(&self) -> &str {
        "firestore"
    }
}

/// Backtick-quote field names that are not plain identifiers.
fn quote_field_path(name: &str) -> String {
    let mut chars = name.chars();
    let simple = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

// ====== Typed value mapping ======

fn encode_fields(fields: &Document) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(name, value)| (name.clone(), encode_value(value)))
            .collect(),
    )
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

fn decode_fields(fields: &Value) -> Result<Document, StoreError> {
    let map = fields
        .as_object()
        .ok_or_else(|| StoreError::Decode("document fields are not an object".to_string()))?;
    map.iter()
        .map(|(name, value)| Ok((name.clone(), decode_value(value)?)))
        .collect()
}

fn decode_value(value: &Value) -> Result<Value, StoreError> {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return Err(StoreError::Decode(format!("untyped value: {value}")));
    };

    let decoded = match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => inner.clone(),
        "integerValue" => {
            let parsed = inner
                .as_str()
                .and_then(|s| s.parse::<i64>().ok())
                .or_else(|| inner.as_i64())
                .ok_or_else(|| StoreError::Decode(format!("bad integer: {inner}")))?;
            json!(parsed)
        }
        "doubleValue" => inner.clone(),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "arrayValue" => {
            let items = inner
                .get("values")
                .and_then(|v| v.as_array())
                .map(|values| values.iter().map(decode_value).collect::<Result<Vec<_>, _>>())
                .transpose()?
                .unwrap_or_default();
            Value::Array(items)
        }
        "mapValue" => {
            let fields = inner.get("fields").cloned().unwrap_or_else(|| json!({}));
            Value::Object(decode_fields(&fields)?)
        }
        "geoPointValue" => inner.clone(),
        other => return Err(StoreError::Decode(format!("unsupported value type: {other}"))),
    };
    Ok(decoded)
}
