use std::io::Read;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{
    AnnotationRecord, BlobStore, ImageDescriptor, ImageOrder, NewAnnotation, NewImage,
    RecordStore, StoreError, UploadOptions,
};

/// Client for a PostgREST database plus object storage, as exposed by hosted
/// backend-as-a-service projects (`/rest/v1`, `/storage/v1`).
pub struct RestBackend {
    base_url: String,
    api_key: String,
    bucket: String,
    agent: ureq::Agent,
}

impl RestBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            bucket: bucket.into(),
            agent,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            encode_object_path(path)
        )
    }

    fn authorized(&self, request: ureq::Request) -> ureq::Request {
        request
            .set("apikey", &self.api_key)
            .set("Authorization", &format!("Bearer {}", self.api_key))
    }

    fn select<T: DeserializeOwned>(&self, request: ureq::Request) -> Result<Vec<T>, StoreError> {
        let response = self.authorized(request).call().map_err(map_error)?;
        response
            .into_json::<Vec<T>>()
            .map_err(|err| StoreError::Decode(err.to_string()))
    }

    fn insert<B: Serialize, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        let request = self
            .authorized(self.agent.post(&self.table_url(table)))
            .set("Prefer", "return=representation");
        let response = request.send_json(body).map_err(map_error)?;
        let mut rows = response
            .into_json::<Vec<T>>()
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        if rows.is_empty() {
            return Err(StoreError::Decode(format!("insert into {table} returned no row")));
        }
        Ok(rows.swap_remove(0))
    }
}

impl RecordStore for RestBackend {
    fn list_images(
        &self,
        order: ImageOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ImageDescriptor>, StoreError> {
        let mut request = self
            .agent
            .get(&self.table_url("images"))
            .query("select", "*")
            .query("order", order_clause(order));
        if let Some(limit) = limit {
            request = request.query("limit", &limit.to_string());
        }
        self.select(request)
    }

    fn insert_image(&self, image: NewImage) -> Result<ImageDescriptor, StoreError> {
        self.insert("images", &[image])
    }

    fn delete_image(&self, id: &str) -> Result<(), StoreError> {
        let request = self
            .agent
            .delete(&self.table_url("images"))
            .query("id", &format!("eq.{id}"));
        self.authorized(request).call().map_err(map_error)?;
        Ok(())
    }

    fn find_annotation(
        &self,
        form_token: &str,
        image_id: &str,
    ) -> Result<Option<AnnotationRecord>, StoreError> {
        let request = self
            .agent
            .get(&self.table_url("annotations"))
            .query("select", "*")
            .query("form_token", &format!("eq.{form_token}"))
            .query("image_id", &format!("eq.{image_id}"))
            .query("limit", "1");
        let rows: Vec<AnnotationRecord> = self.select(request)?;
        Ok(rows.into_iter().next())
    }

    fn insert_annotation(
        &self,
        annotation: NewAnnotation,
    ) -> Result<AnnotationRecord, StoreError> {
        self.insert("annotations", &[annotation])
    }
}

impl BlobStore for RestBackend {
    fn upload(&self, path: &str, bytes: &[u8], options: &UploadOptions) -> Result<(), StoreError> {
        let mut request = self
            .authorized(self.agent.post(&self.object_url(path)))
            .set("Content-Type", &options.content_type)
            .set("x-upsert", if options.upsert { "true" } else { "false" });
        if let Some(seconds) = &options.cache_control {
            request = request.set("cache-control", &format!("max-age={seconds}"));
        }
        request.send_bytes(bytes).map_err(map_error)?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> Result<String, StoreError> {
        Ok(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            encode_object_path(path)
        ))
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.agent.get(url).call().map_err(map_error)?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        Ok(bytes)
    }

    fn remove(&self, paths: &[String]) -> Result<(), StoreError> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, self.bucket);
        self.authorized(self.agent.delete(&url))
            .send_json(serde_json::json!({ "prefixes": paths }))
            .map_err(map_error)?;
        Ok(())
    }
}

fn order_clause(order: ImageOrder) -> &'static str {
    match order {
        ImageOrder::LeastAnswered => "response_count.asc",
        ImageOrder::Newest => "created_at.desc",
    }
}

/// Postgres error code for a unique violation.
const UNIQUE_VIOLATION: &str = "23505";

fn map_error(err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Status(status, response) => status_error(status, error_body(response)),
        ureq::Error::Transport(transport) => StoreError::Transport(transport.to_string()),
    }
}

/// Only a unique violation counts as a conflict. Other 409s, such as a
/// foreign key pointing at a deleted image, are plain rejections.
fn status_error(status: u16, message: String) -> StoreError {
    match status {
        409 if is_unique_violation(&message) => StoreError::Conflict(message),
        404 => StoreError::NotFound(message),
        _ => StoreError::Rejected { status, message },
    }
}

fn is_unique_violation(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    value.get("code").and_then(serde_json::Value::as_str) == Some(UNIQUE_VIOLATION)
        || value.get("error").and_then(serde_json::Value::as_str) == Some("Duplicate")
}

fn error_body(response: ureq::Response) -> String {
    response
        .into_string()
        .unwrap_or_else(|err| format!("unreadable error body: {err}"))
}

/// Percent-encodes each path segment, keeping `/` separators.
fn encode_object_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{encode_object_path, order_clause, status_error, RestBackend};
    use crate::backend::{BlobStore, ImageOrder, StoreError};

    #[test]
    fn object_paths_are_percent_encoded_per_segment() {
        assert_eq!(
            encode_object_path("annotations/17-my photo.png"),
            "annotations/17-my%20photo.png"
        );
        assert_eq!(encode_object_path("é.png"), "%C3%A9.png");
    }

    #[test]
    fn public_url_points_at_public_bucket() {
        let backend = RestBackend::new("https://project.example.co/", "key", "survey_images");
        assert_eq!(
            backend.public_url("a b.png").expect("url"),
            "https://project.example.co/storage/v1/object/public/survey_images/a%20b.png"
        );
        assert_eq!(
            backend.object_url("annotations/x.png"),
            "https://project.example.co/storage/v1/object/survey_images/annotations/x.png"
        );
    }

    #[test]
    fn order_clauses_match_listing_modes() {
        assert_eq!(order_clause(ImageOrder::LeastAnswered), "response_count.asc");
        assert_eq!(order_clause(ImageOrder::Newest), "created_at.desc");
    }

    #[test]
    fn only_unique_violations_become_conflicts() {
        let unique = r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#;
        assert!(matches!(
            status_error(409, unique.to_string()),
            StoreError::Conflict(_)
        ));

        let foreign_key = r#"{"code":"23503","message":"violates foreign key constraint"}"#;
        assert_eq!(
            status_error(409, foreign_key.to_string()),
            StoreError::Rejected {
                status: 409,
                message: foreign_key.to_string(),
            }
        );
        assert!(matches!(
            status_error(409, "not json".to_string()),
            StoreError::Rejected { status: 409, .. }
        ));
        assert!(matches!(
            status_error(404, String::new()),
            StoreError::NotFound(_)
        ));
    }
}
