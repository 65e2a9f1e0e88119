use crate::auth::authenticate;
use crate::config::Config;
use crate::cors::CorsPolicy;
use crate::errors::{Result, UpsertError};
use crate::metrics_defs::{RECIPES_SKIPPED, RECIPES_UPSERTED, REQUEST_DURATION, REQUESTS};
use crate::recipe::{RecipeRecord, is_truthy};
use crate::store::{self, ContentStore};
use crate::sync::{CollectionSync, commit_message};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue, ORIGIN};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value, json};
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;

/// Successful terminal states of a request.
#[derive(Debug, PartialEq)]
enum Outcome {
    Preflight,
    Batch { count: usize, ids: Vec<String> },
    Single { id: String },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Recipes extracted from the request body, already normalized.
struct Submission {
    records: Vec<RecipeRecord>,
    single: bool,
}

/// Runs the authenticate, fetch, merge and commit pipeline for one request.
///
/// The handler holds no state between requests apart from its configuration;
/// the collection is fetched fresh every time.
pub struct UpsertHandler {
    admin_password: Option<String>,
    cors: CorsPolicy,
    // Err holds the reason the store could not be built
    sync: std::result::Result<CollectionSync, String>,
}

impl UpsertHandler {
    pub fn from_config(config: &Config) -> Self {
        let store = store::from_config(&config.store).map_err(|e| {
            tracing::warn!(error = %e, "Store is not configured, upserts will fail");
            e.to_string()
        });
        Self::build(config, store)
    }

    /// Uses `store` instead of the backend named in `config.store`.
    pub fn with_store(config: &Config, store: Arc<dyn ContentStore>) -> Self {
        Self::build(config, Ok(store))
    }

    fn build(
        config: &Config,
        store: std::result::Result<Arc<dyn ContentStore>, String>,
    ) -> Self {
        UpsertHandler {
            admin_password: config.admin_password.clone(),
            cors: CorsPolicy::new(&config.cors.allowed_origins),
            sync: store
                .map(|store| CollectionSync::new(store, &config.store.path, &config.store.branch)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.sync.is_ok()
    }

    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let start = Instant::now();
        let origin = request_origin(&request);

        let (response, outcome) = match self.process(&request, origin.as_deref()).await {
            Ok(outcome) => {
                let label = match outcome {
                    Outcome::Preflight => "preflight",
                    _ => "ok",
                };
                (self.success_response(outcome, origin.as_deref()), label)
            }
            Err(error) => (
                self.failure_response(&error, origin.as_deref()),
                error.code(),
            ),
        };

        counter!(REQUESTS, "outcome" => outcome).increment(1);
        histogram!(REQUEST_DURATION, "outcome" => outcome).record(start.elapsed().as_secs_f64());
        response
    }

    /// JSON error response, with CORS headers, for a request that failed with `error`.
    pub fn failure_response(&self, error: &UpsertError, origin: Option<&str>) -> Response<Bytes> {
        let status = error.status();
        if status.is_server_error() {
            tracing::error!(error = %error, code = error.code(), "Upsert request failed");
        } else {
            tracing::info!(code = error.code(), "Upsert request rejected");
        }

        let body = ErrorBody {
            error: error.code(),
            detail: error.detail(),
        };
        let content = serde_json::to_string(&body)
            .unwrap_or_else(|_| format!(r#"{{"error":"{}"}}"#, error.code()));

        self.json_response(status, content, origin)
    }

    fn success_response(&self, outcome: Outcome, origin: Option<&str>) -> Response<Bytes> {
        let body = match outcome {
            Outcome::Preflight => {
                let mut response = Response::new(Bytes::new());
                self.cors.apply(response.headers_mut(), origin);
                return response;
            }
            Outcome::Batch { count, ids } => json!({ "ok": true, "count": count, "ids": ids }),
            Outcome::Single { id } => json!({ "ok": true, "id": id }),
        };

        self.json_response(StatusCode::OK, body.to_string(), origin)
    }

    fn json_response(
        &self,
        status: StatusCode,
        content: String,
        origin: Option<&str>,
    ) -> Response<Bytes> {
        let mut response = Response::new(Bytes::from(content));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.cors.apply(response.headers_mut(), origin);
        response
    }

    async fn process(&self, request: &Request<Bytes>, origin: Option<&str>) -> Result<Outcome> {
        match *request.method() {
            Method::OPTIONS => return Ok(Outcome::Preflight),
            Method::POST => {}
            _ => return Err(UpsertError::MethodNotAllowed),
        }

        if !self.cors.is_allowed(origin) {
            return Err(UpsertError::ForbiddenOrigin);
        }

        let payload = parse_payload(request.body());
        let password = payload.get("password").and_then(Value::as_str);
        authenticate(password, self.admin_password.as_deref())?;

        let submission = extract_submission(&payload)?;

        let sync = self
            .sync
            .as_ref()
            .map_err(|reason| UpsertError::Misconfigured(reason.clone()))?;

        let loaded = sync.load().await?;
        let mut collection = loaded.collection;
        let summary = collection.upsert_all(&submission.records);

        sync.commit(
            &collection,
            loaded.version,
            commit_message(&submission.records),
        )
        .await?;

        counter!(RECIPES_UPSERTED).increment(summary.count as u64);
        tracing::info!(
            count = summary.count,
            ids = ?summary.ids,
            total = collection.len(),
            "Committed recipe collection"
        );

        if submission.single
            && let Some(id) = summary.ids.first().cloned()
        {
            return Ok(Outcome::Single { id });
        }

        Ok(Outcome::Batch {
            count: summary.count,
            ids: summary.ids,
        })
    }
}

fn request_origin(request: &Request<Bytes>) -> Option<String> {
    request
        .headers()
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

// Anything other than a JSON object reads as an empty payload, which then
// fails authentication.
fn parse_payload(body: &Bytes) -> Map<String, Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(payload)) => payload,
        _ => Map::new(),
    }
}

/// A `recipes` array selects the batch form; otherwise a `recipe` selects the
/// single form.
fn extract_submission(payload: &Map<String, Value>) -> Result<Submission> {
    if let Some(Value::Array(inputs)) = payload.get("recipes") {
        let records: Vec<RecipeRecord> = inputs
            .iter()
            .filter_map(|input| match RecipeRecord::normalize(input) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping recipe input");
                    None
                }
            })
            .collect();

        let skipped = inputs.len() - records.len();
        if skipped > 0 {
            counter!(RECIPES_SKIPPED).increment(skipped as u64);
        }

        if records.is_empty() {
            return Err(UpsertError::NoRecipes);
        }

        return Ok(Submission {
            records,
            single: false,
        });
    }

    match payload.get("recipe").filter(|input| is_truthy(input)) {
        Some(input) => {
            let record = RecipeRecord::normalize(input).map_err(|e| {
                counter!(RECIPES_SKIPPED).increment(1);
                tracing::debug!(error = %e, "Rejecting recipe input");
                UpsertError::BadRecipe
            })?;
            Ok(Submission {
                records: vec![record],
                single: true,
            })
        }
        None => Err(UpsertError::NoRecipes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;
    use crate::config::{GitHubConfig, StoreBackend};
    use crate::store::memory::MemoryStore;
    use hyper::header::{ACCESS_CONTROL_ALLOW_ORIGIN, VARY};

    const PASSWORD: &str = "letmein";

    fn config(allowed_origins: &[&str]) -> Config {
        let mut config = Config::default();
        config.admin_password = Some(PASSWORD.into());
        config.cors.allowed_origins = allowed_origins.iter().map(|o| o.to_string()).collect();
        config
    }

    fn handler(store: &Arc<MemoryStore>) -> UpsertHandler {
        UpsertHandler::with_store(&config(&[]), store.clone())
    }

    fn post(body: Value) -> Request<Bytes> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/upsert-recipes")
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from(body.to_string()))
            .unwrap()
    }

    fn body_json(response: &Response<Bytes>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    fn stored(store: &MemoryStore) -> Collection {
        Collection::decode(&store.document().unwrap().content)
    }

    fn stored_names(store: &MemoryStore) -> Vec<String> {
        stored(store)
            .records()
            .iter()
            .map(|record| record["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_preflight() {
        let store = Arc::new(MemoryStore::new());
        let request = Request::builder()
            .method(Method::OPTIONS)
            .body(Bytes::new())
            .unwrap();

        let response = handler(&store).handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_empty());
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(store.fetches(), 0);
    }

    #[tokio::test]
    async fn test_method_not_allowed_before_auth() {
        let store = Arc::new(MemoryStore::new());
        let request = Request::builder()
            .method(Method::GET)
            .body(Bytes::new())
            .unwrap();

        let response = handler(&store).handle(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_json(&response), json!({ "error": "method-not-allowed" }));
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(store.fetches(), 0);
    }

    #[tokio::test]
    async fn test_forbidden_origin_before_auth() {
        let store = Arc::new(MemoryStore::new());
        let handler =
            UpsertHandler::with_store(&config(&["https://admin.example"]), store.clone());

        // A correct password does not get past a disallowed origin
        let mut request = post(json!({ "password": PASSWORD, "recipe": { "name": "Negroni" } }));
        request
            .headers_mut()
            .insert(ORIGIN, HeaderValue::from_static("https://evil.example"));
        let response = handler.handle(request).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(&response), json!({ "error": "forbidden-origin" }));
        assert_eq!(response.headers()[VARY], "Origin");
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        // No Origin header at all
        let request = post(json!({ "password": PASSWORD, "recipe": { "name": "Negroni" } }));
        let response = handler.handle(request).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(store.fetches(), 0);

        let mut request = post(json!({ "password": PASSWORD, "recipe": { "name": "Negroni" } }));
        request
            .headers_mut()
            .insert(ORIGIN, HeaderValue::from_static("https://admin.example"));
        let response = handler.handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://admin.example"
        );
    }

    #[tokio::test]
    async fn test_unauthorized_never_touches_store() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(&store);

        for body in [
            json!({ "recipe": { "name": "Negroni" } }),
            json!({ "password": "wrong", "recipe": { "name": "Negroni" } }),
            json!({ "password": "", "recipe": { "name": "Negroni" } }),
            json!(["not", "an", "object"]),
        ] {
            let response = handler.handle(post(body)).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(&response), json!({ "error": "unauthorized" }));
        }

        let request = Request::builder()
            .method(Method::POST)
            .body(Bytes::from_static(b"{not json"))
            .unwrap();
        let response = handler.handle(request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(store.fetches(), 0);
        assert!(store.commits().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_without_configured_password() {
        let store = Arc::new(MemoryStore::new());
        let handler = UpsertHandler::with_store(&Config::default(), store.clone());

        let response = handler
            .handle(post(json!({ "password": "", "recipe": { "name": "Negroni" } })))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(store.fetches(), 0);
    }

    #[tokio::test]
    async fn test_no_recipes() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(&store);

        for body in [
            json!({ "password": PASSWORD }),
            json!({ "password": PASSWORD, "recipes": [] }),
            json!({ "password": PASSWORD, "recipes": [{ "glass": "coupe" }, null] }),
            json!({ "password": PASSWORD, "recipe": null }),
        ] {
            let response = handler.handle(post(body)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(&response), json!({ "error": "no-recipes" }));
        }

        let response = handler
            .handle(post(json!({ "password": PASSWORD, "recipe": { "glass": "coupe" } })))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(&response), json!({ "error": "bad-recipe" }));

        assert_eq!(store.fetches(), 0);
    }

    #[tokio::test]
    async fn test_missing_store_config() {
        let mut config = config(&[]);
        config.store.backend = StoreBackend::Github(GitHubConfig {
            owner: Some("owner".into()),
            repo: Some("repo".into()),
            ..GitHubConfig::default()
        });
        let handler = UpsertHandler::from_config(&config);
        assert!(!handler.is_ready());

        let response = handler
            .handle(post(json!({ "password": PASSWORD, "recipe": { "name": "Negroni" } })))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(&response), json!({ "error": "missing-github-config" }));
    }

    #[tokio::test]
    async fn test_first_write_single_recipe() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(&store);
        assert!(handler.is_ready());

        let response = handler
            .handle(post(json!({
                "password": PASSWORD,
                "recipe": { "name": "Old Fashioned", "base": ["Whiskey"] }
            })))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(body_json(&response), json!({ "ok": true, "id": "old-fashioned" }));

        let commits = store.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].version, None);
        assert_eq!(commits[0].path, "custom-recipes.json");
        assert_eq!(commits[0].branch, "main");
        assert_eq!(commits[0].message, "Add/update recipe: Old Fashioned");

        let collection = stored(&store);
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.records()[0]["base"], json!(["whiskey"]));
    }

    #[tokio::test]
    async fn test_batch_counts_only_named_recipes() {
        let store = Arc::new(MemoryStore::with_document("[]"));
        let handler = handler(&store);

        let response = handler
            .handle(post(json!({
                "password": PASSWORD,
                "recipes": [
                    { "name": "Negroni" },
                    { "glass": "coupe" },
                    { "name": "" },
                    "Gimlet",
                    { "name": "Aviation", "id": "aviation-classic" },
                ]
            })))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(&response),
            json!({ "ok": true, "count": 2, "ids": ["negroni", "aviation-classic"] })
        );

        let commits = store.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].version.as_deref(), Some("v0"));
        assert_eq!(commits[0].message, "Add/update 2 recipes");
    }

    #[tokio::test]
    async fn test_collection_sorted_after_write() {
        let store = Arc::new(MemoryStore::with_document(
            r#"[{"id": "zombie", "name": "Zombie"}, {"id": "daiquiri", "name": "daiquiri"}]"#,
        ));

        let response = handler(&store)
            .handle(post(json!({
                "password": PASSWORD,
                "recipes": [{ "name": "Boulevardier" }, { "name": "Americano" }]
            })))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        // ids keep input order
        assert_eq!(
            body_json(&response)["ids"],
            json!(["boulevardier", "americano"])
        );
        assert_eq!(
            stored_names(&store),
            ["Americano", "Boulevardier", "daiquiri", "Zombie"]
        );
    }

    #[tokio::test]
    async fn test_minimal_update_resets_defaults() {
        let existing = json!([{
            "id": "martini",
            "name": "Martini",
            "base": ["gin"],
            "sweetness": "dry",
            "ingredients": [["2 oz", "gin"], ["1 oz", "dry vermouth"]],
            "glass": "coupe",
            "source": "house book"
        }]);
        let store = Arc::new(MemoryStore::with_document(&existing.to_string()));

        let response = handler(&store)
            .handle(post(json!({ "password": PASSWORD, "recipe": { "name": "Martini" } })))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let collection = stored(&store);
        assert_eq!(collection.len(), 1);
        let record = &collection.records()[0];
        assert_eq!(record["sweetness"], "balanced");
        assert_eq!(record["ingredients"], json!([]));
        assert_eq!(record["base"], json!([]));
        assert_eq!(record["glass"], "");
        // Keys the normalizer never produces survive the merge
        assert_eq!(record["source"], "house book");
    }

    #[tokio::test]
    async fn test_same_slug_in_batch() {
        let store = Arc::new(MemoryStore::new());

        let response = handler(&store)
            .handle(post(json!({
                "password": PASSWORD,
                "recipes": [
                    { "name": "Dry Martini", "glass": "coupe" },
                    { "name": "Dry, Martini!", "glass": "nick and nora" },
                ]
            })))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(&response),
            json!({ "ok": true, "count": 2, "ids": ["dry-martini", "dry-martini"] })
        );

        let collection = stored(&store);
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.records()[0]["name"], "Dry, Martini!");
        assert_eq!(collection.records()[0]["glass"], "nick and nora");
    }

    #[tokio::test]
    async fn test_read_failure() {
        let store = Arc::new(MemoryStore::new().failing_fetch());

        let response = handler(&store)
            .handle(post(json!({ "password": PASSWORD, "recipe": { "name": "Negroni" } })))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(&response),
            json!({
                "error": "github-read-failed",
                "detail": "unexpected status 502: Bad Gateway"
            })
        );
        assert!(store.commits().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure() {
        let store = Arc::new(MemoryStore::with_document("[]").failing_commit());

        let response = handler(&store)
            .handle(post(json!({ "password": PASSWORD, "recipe": { "name": "Negroni" } })))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(&response);
        assert_eq!(body["error"], "github-write-failed");
        assert_eq!(body["detail"], "unexpected status 503: Service Unavailable");
        assert_eq!(store.document().unwrap().content, "[]");
    }

    /// Store whose document changes between the fetch and the commit.
    struct RacingStore {
        inner: MemoryStore,
        commit_attempts: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ContentStore for RacingStore {
        fn name(&self) -> &'static str {
            "racing"
        }

        async fn fetch(
            &self,
            path: &str,
            branch: &str,
        ) -> std::result::Result<Option<store::StoredDocument>, store::StoreError> {
            let fetched = self.inner.fetch(path, branch).await;
            self.inner.replace_document(r#"[{"name": "Gimlet"}]"#);
            fetched
        }

        async fn commit(
            &self,
            request: store::CommitRequest,
        ) -> std::result::Result<(), store::StoreError> {
            self.commit_attempts
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.commit(request).await
        }
    }

    #[tokio::test]
    async fn test_write_conflict_is_not_retried() {
        let store = Arc::new(RacingStore {
            inner: MemoryStore::with_document("[]"),
            commit_attempts: Default::default(),
        });
        let handler = UpsertHandler::with_store(&config(&[]), store.clone());

        let response = handler
            .handle(post(json!({ "password": PASSWORD, "recipe": { "name": "Negroni" } })))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(&response);
        assert_eq!(body["error"], "github-write-failed");
        assert!(body["detail"].as_str().unwrap().starts_with("version conflict"));

        assert_eq!(
            store
                .commit_attempts
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert_eq!(
            store.inner.document().unwrap().content,
            r#"[{"name": "Gimlet"}]"#
        );
    }

    #[test]
    fn test_extract_submission_forms() {
        let batch = json!({ "recipes": [{ "name": "Negroni" }], "recipe": { "name": "Gimlet" } });
        let submission = extract_submission(batch.as_object().unwrap()).unwrap();
        assert!(!submission.single);
        assert_eq!(submission.records[0].name, "Negroni");

        // `recipes` that is not an array falls through to `recipe`
        let single = json!({ "recipes": "Negroni", "recipe": { "name": "Gimlet" } });
        let submission = extract_submission(single.as_object().unwrap()).unwrap();
        assert!(submission.single);
        assert_eq!(submission.records[0].name, "Gimlet");
    }
}
