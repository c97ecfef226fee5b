//! Standard response envelope helpers.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Serialize)]
pub struct SuccessMany<T> {
    pub data: Vec<T>,
    pub meta: MetaCount,
}

#[derive(Serialize)]
pub struct MetaCount {
    pub count: u64,
}

pub fn success_one_ok<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::OK, Json(SuccessOne { data, meta: None }))
}

/// Single item plus a free-form `meta` object (e.g. a run summary).
pub fn success_one_with_meta<T: Serialize>(data: T, meta: Value) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::OK, Json(SuccessOne { data, meta: Some(meta) }))
}

pub fn success_many<T: Serialize>(data: Vec<T>) -> (StatusCode, Json<SuccessMany<T>>) {
    let meta = MetaCount { count: data.len() as u64 };
    (StatusCode::OK, Json(SuccessMany { data, meta }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelopes_carry_meta_only_when_present() {
        let (status, Json(one)) = success_one_ok(json!({ "allowed": true }));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::to_value(one).unwrap(), json!({ "data": { "allowed": true } }));

        let (_, Json(with_meta)) = success_one_with_meta("acme", json!({ "complete": false }));
        assert_eq!(
            serde_json::to_value(with_meta).unwrap(),
            json!({ "data": "acme", "meta": { "complete": false } })
        );

        let (_, Json(many)) = success_many(vec!["acme", "beta"]);
        assert_eq!(
            serde_json::to_value(many).unwrap(),
            json!({ "data": ["acme", "beta"], "meta": { "count": 2 } })
        );
    }
}
