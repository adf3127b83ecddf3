//! Shared helpers for the integration tests: key-set documents, token
//! minting and an in-process application wired to a mock key-set server.

#![allow(dead_code)]

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use task_status_gate::app_state::AppState;
use task_status_gate::services::key_cache::{KeyCache, MemoryKeyCache};
use task_status_gate::services::queue::{QueueError, TaskMessage, TaskPublisher};
use task_status_gate::services::status_store::JobStatusStore;
use task_status_gate::services::token::{TokenVerifier, TokenVerifierConfig};

use crate::fixtures::{RsaKeyFixture, TEST_ADMIN_TOKEN, TEST_AUDIENCE};

pub const PUBLIC_BASE_URL: &str = "https://tasks.example";

/// Public JWK for `key`.
pub fn rsa_jwk(key: &RsaKeyFixture) -> Value {
    json!({
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "kid": key.kid,
        "n": key.modulus,
        "e": key.exponent,
    })
}

pub fn jwks_document(keys: &[&RsaKeyFixture]) -> Value {
    json!({ "keys": keys.iter().map(|k| rsa_jwk(k)).collect::<Vec<_>>() })
}

/// Path the mock server serves `audience`'s key set on.
pub fn jwks_path(audience: &str) -> String {
    format!("/rest/v1/apps/{audience}/jwks")
}

/// Serve `keys` as `audience`'s key set, expecting exactly `expected_fetches` requests.
pub async fn mount_jwks(
    server: &MockServer,
    audience: &str,
    keys: &[&RsaKeyFixture],
    expected_fetches: u64,
) {
    Mock::given(method("GET"))
        .and(path(jwks_path(audience)))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
        .expect(expected_fetches)
        .mount(server)
        .await;
}

pub fn verifier_config(server: &MockServer) -> TokenVerifierConfig {
    TokenVerifierConfig {
        admin_token: Some(TEST_ADMIN_TOKEN.to_string()),
        allowed_audiences: vec![TEST_AUDIENCE.to_string()],
        jwks_url_template: format!("{}/rest/v1/apps/{{aud}}/jwks", server.uri()),
        ..TokenVerifierConfig::default()
    }
}

pub fn verifier(server: &MockServer) -> TokenVerifier {
    let cache: Arc<dyn KeyCache> = Arc::new(MemoryKeyCache::new());
    TokenVerifier::new(verifier_config(server), cache)
}

/// Claims of a well-formed token for the test application, valid for an hour.
pub fn standard_claims() -> Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "aud": TEST_AUDIENCE,
        "brandId": "BAF-brand-1",
        "userId": "AUF-user-1",
        "iat": now,
        "exp": now + 3600,
    })
}

/// Sign `claims` with `key`, putting `kid` in the header when given.
pub fn mint_token(key: &RsaKeyFixture, kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let encoding_key =
        EncodingKey::from_rsa_pem(key.private_pem.as_bytes()).expect("Invalid RSA fixture");
    encode(&header, claims, &encoding_key).expect("Failed to sign token")
}

/// Task publisher that records messages instead of sending them.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<TaskMessage>>,
}

impl RecordingPublisher {
    pub fn messages(&self) -> Vec<TaskMessage> {
        self.messages.lock().expect("publisher lock poisoned").clone()
    }
}

#[async_trait]
impl TaskPublisher for RecordingPublisher {
    async fn publish(&self, message: &TaskMessage) -> Result<(), QueueError> {
        self.messages
            .lock()
            .expect("publisher lock poisoned")
            .push(message.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Task publisher whose transport is always down.
pub struct FailingPublisher;

#[async_trait]
impl TaskPublisher for FailingPublisher {
    async fn publish(&self, _message: &TaskMessage) -> Result<(), QueueError> {
        Err(QueueError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        ))))
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

pub struct TestApp {
    pub router: axum::Router,
    pub store: JobStatusStore,
    pub publisher: Arc<RecordingPublisher>,
}

/// Application router backed by an in-memory cache, a recording publisher
/// and a status store with the given record lifetime.
pub fn test_app(server: &MockServer, status_ttl: Duration) -> TestApp {
    let store = JobStatusStore::new(status_ttl);
    let publisher = Arc::new(RecordingPublisher::default());
    let state = AppState::new(
        store.clone(),
        verifier(server),
        publisher.clone(),
        PUBLIC_BASE_URL,
    );
    TestApp {
        router: task_status_gate::routes::api_router(state),
        store,
        publisher,
    }
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}
