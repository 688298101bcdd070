use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use aquaops_api::app::{AppServices, build_app};
use aquaops_api::config::AppConfig;
use aquaops_auth::{Role, SecretHasher, SessionClaims, TokenKind};
use aquaops_billing::WebhookVerifier;

const ADMIN_KEY: &str = "admin-secret-for-tests";
const PASSWORD: &str = "correct horse battery";

struct TestServer {
    base_url: String,
    config: AppConfig,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        aquaops_observability::init_for_tests();

        let mut config = AppConfig::default();
        config.auth.jwt_secret = "black-box-jwt-secret-0123456789".into();
        config.billing.webhook_secret = "whsec_black_box".into();
        config.admin.key_hash = Some(SecretHasher::hash(ADMIN_KEY).expect("hash admin key"));

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(Arc::new(AppServices::in_memory(&config)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            base_url,
            config,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn register(&self, slug: &str) -> Tenant {
        let res = self
            .client
            .post(self.url("/auth/register"))
            .json(&json!({
                "organization_name": format!("{slug} farms"),
                "slug": slug,
                "owner_email": format!("owner@{slug}.test"),
                "owner_name": "Owner",
                "password": PASSWORD,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert!(res.headers().get("set-cookie").is_some());
        let body: Value = res.json().await.unwrap();
        Tenant {
            token: body["token"].as_str().unwrap().to_string(),
            organization_id: body["organization"]["id"].as_str().unwrap().to_string(),
            owner_id: body["user"]["id"].as_str().unwrap().to_string(),
        }
    }

    async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client.get(self.url(path)).bearer_auth(token).send().await.unwrap()
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn admin_post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("x-admin-key", ADMIN_KEY)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn deliver_webhook(&self, payload: &Value) -> Value {
        let body = serde_json::to_vec(payload).unwrap();
        let verifier = WebhookVerifier::new(self.config.billing.webhook_secret.clone(), 300);
        let signature = verifier.sign(&body, Utc::now().timestamp());
        let res = self
            .client
            .post(self.url("/billing/webhook"))
            .header("stripe-signature", signature)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        res.json().await.unwrap()
    }

    async fn create_api_key(&self, tenant: &Tenant, body: Value) -> String {
        let res = self.post("/api-keys", &tenant.token, body).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let created: Value = res.json().await.unwrap();
        created["key"].as_str().unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Tenant {
    token: String,
    organization_id: String,
    owner_id: String,
}

async fn error_code(res: reqwest::Response) -> String {
    let body: Value = res.json().await.unwrap();
    body["error"].as_str().unwrap_or_default().to_string()
}

fn mint_session(secret: &str, tenant: &Tenant, issued_at: chrono::DateTime<Utc>, ttl: ChronoDuration) -> String {
    let claims = SessionClaims {
        sub: tenant.owner_id.parse().unwrap(),
        org: tenant.organization_id.parse().unwrap(),
        org_slug: "minted".into(),
        role: Role::Owner,
        plant: None,
        iat: issued_at.timestamp(),
        exp: (issued_at + ttl).timestamp(),
        kind: TokenKind::Session,
        imp: None,
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

#[tokio::test]
async fn health_is_public_and_whoami_requires_credentials() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "unauthenticated");
}

#[tokio::test]
async fn register_then_login_yields_a_working_session() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("tilapia").await;

    let res = srv
        .client
        .post(srv.url("/auth/login"))
        .json(&json!({
            "organization_slug": "TILAPIA",
            "email": "Owner@Tilapia.test",
            "password": PASSWORD,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let token = body["token"].as_str().unwrap();

    let res = srv.get("/whoami", token).await;
    assert_eq!(res.status(), StatusCode::OK);
    let me: Value = res.json().await.unwrap();
    assert_eq!(me["organization_id"], tenant.organization_id.as_str());
    assert_eq!(me["plan"], "starter");

    // wrong password, unknown slug and unknown email look identical
    let attempts = [
        ("tilapia", "owner@tilapia.test", "wrong password"),
        ("nope", "owner@tilapia.test", PASSWORD),
        ("tilapia", "nobody@tilapia.test", PASSWORD),
    ];
    for (slug, email, password) in attempts {
        let res = srv
            .client
            .post(srv.url("/auth/login"))
            .json(&json!({ "organization_slug": slug, "email": email, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(res).await, "unauthenticated");
    }
}

#[tokio::test]
async fn duplicate_slug_is_a_conflict() {
    let srv = TestServer::spawn().await;
    srv.register("salmon").await;

    let res = srv
        .client
        .post(srv.url("/auth/register"))
        .json(&json!({
            "organization_name": "Other salmon",
            "slug": "salmon",
            "owner_email": "someone@else.test",
            "owner_name": "Someone",
            "password": PASSWORD,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn records_of_another_tenant_are_not_found() {
    let srv = TestServer::spawn().await;
    let a = srv.register("alpha").await;
    let b = srv.register("bravo").await;

    let res = srv.post("/plants", &a.token, json!({ "name": "North pond" })).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let plant: Value = res.json().await.unwrap();
    let plant_id = plant["id"].as_str().unwrap().to_string();

    let res = srv.get(&format!("/plants/{plant_id}"), &a.token).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.get(&format!("/plants/{plant_id}"), &b.token).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = srv.get("/plants", &b.token).await;
    let listed: Value = res.json().await.unwrap();
    assert_eq!(listed["plants"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn starter_plan_limits_plants() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("limits").await;

    let res = srv.post("/plants", &tenant.token, json!({ "name": "One" })).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = srv.post("/plants", &tenant.token, json!({ "name": "Two" })).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn suspended_tenant_rejects_existing_sessions() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("suspend-me").await;

    let res = srv.get("/whoami", &tenant.token).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv
        .admin_post(&format!("/admin/organizations/{}/suspend", tenant.organization_id), json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.get("/whoami", &tenant.token).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "tenant_inactive");

    let res = srv
        .admin_post(&format!("/admin/organizations/{}/activate", tenant.organization_id), json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = srv.get("/whoami", &tenant.token).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_require_the_admin_key() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("admin-check").await;

    let res = srv.get("/admin/organizations", &tenant.token).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .get(srv.url("/admin/organizations"))
        .header("x-admin-key", "not-the-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .get(srv.url("/admin/organizations"))
        .header("x-admin-key", ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn impersonation_token_is_labelled_and_audited() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("impersonated").await;

    let res = srv
        .admin_post("/admin/impersonate", json!({ "organization_id": tenant.organization_id }))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let token = body["token"].as_str().unwrap();
    assert_eq!(body["user_id"], tenant.owner_id.as_str());

    let res = srv.get("/whoami", token).await;
    let me: Value = res.json().await.unwrap();
    assert!(me["impersonator"].is_string());

    let res = srv.post("/plants", token, json!({ "name": "Support pond" })).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = srv.get("/audit?action=plant.created", &tenant.token).await;
    let audit: Value = res.json().await.unwrap();
    assert_eq!(
        audit["entries"][0]["actor"],
        format!("super_admin as user:{}", tenant.owner_id).as_str()
    );

    let res = srv.get("/audit?action=user.impersonated", &tenant.token).await;
    let audit: Value = res.json().await.unwrap();
    let entries = audit["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["user_id"], Value::Null);
}

#[tokio::test]
async fn expired_and_forged_tokens_are_rejected() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("tokens").await;
    let secret = srv.config.auth.jwt_secret.clone();

    let valid = mint_session(&secret, &tenant, Utc::now(), ChronoDuration::minutes(10));
    let res = srv.get("/whoami", &valid).await;
    assert_eq!(res.status(), StatusCode::OK);

    let expired = mint_session(&secret, &tenant, Utc::now() - ChronoDuration::hours(3), ChronoDuration::hours(1));
    let res = srv.get("/whoami", &expired).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let forged = mint_session("some-other-secret-entirely", &tenant, Utc::now(), ChronoDuration::minutes(10));
    let res = srv.get("/whoami", &forged).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let mut tampered = tenant.token.clone();
    tampered.push('x');
    let res = srv.get("/whoami", &tampered).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn api_key_scopes_limit_what_it_can_do() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("scoped").await;

    let read_only = srv
        .create_api_key(&tenant, json!({ "name": "dashboard", "scopes": ["plants:read"] }))
        .await;

    let res = srv
        .client
        .get(srv.url("/plants"))
        .header("x-api-key", &read_only)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv
        .client
        .post(srv.url("/plants"))
        .header("x-api-key", &read_only)
        .json(&json!({ "name": "Sneaky pond" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "scope_insufficient");

    let maintenance = srv
        .create_api_key(&tenant, json!({ "name": "cmms", "scopes": ["maintenance:*"] }))
        .await;
    let res = srv
        .client
        .get(srv.url("/maintenance/tasks"))
        .header("x-api-key", &maintenance)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv
        .client
        .delete(srv.url(&format!("/users/{}", tenant.owner_id)))
        .header("x-api-key", &maintenance)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "scope_insufficient");
}

#[tokio::test]
async fn revoked_and_unknown_api_keys_are_unauthenticated() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("revoke").await;

    let res = srv
        .post("/api-keys", &tenant.token, json!({ "name": "temp", "scopes": ["plants:read"] }))
        .await;
    let created: Value = res.json().await.unwrap();
    let key = created["key"].as_str().unwrap().to_string();
    let id = created["api_key"]["id"].as_str().unwrap().to_string();

    let res = srv
        .client
        .delete(srv.url(&format!("/api-keys/{id}")))
        .bearer_auth(&tenant.token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    for candidate in [key.as_str(), "wwtp_doesnotexist"] {
        let res = srv
            .client
            .get(srv.url("/plants"))
            .header("x-api-key", candidate)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn api_keys_are_rate_limited() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("ratelimit").await;
    let key = srv
        .create_api_key(
            &tenant,
            json!({ "name": "chatty", "scopes": ["plants:read"], "rate_limit_per_minute": 2 }),
        )
        .await;

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let res = srv
            .client
            .get(srv.url("/plants"))
            .header("x-api-key", &key)
            .send()
            .await
            .unwrap();
        statuses.push(res.status());
    }
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]);
}

#[tokio::test]
async fn owner_cannot_be_demoted_or_deleted() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("owners").await;

    let res = srv
        .post(
            "/users",
            &tenant.token,
            json!({ "email": "admin@owners.test", "name": "Admin", "role": "admin", "password": PASSWORD }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = srv
        .client
        .post(srv.url("/auth/login"))
        .json(&json!({ "organization_slug": "owners", "email": "admin@owners.test", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    let admin: Value = res.json().await.unwrap();
    let admin_token = admin["token"].as_str().unwrap();

    let res = srv
        .client
        .patch(srv.url(&format!("/users/{}/role", tenant.owner_id)))
        .bearer_auth(admin_token)
        .json(&json!({ "role": "viewer" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv
        .client
        .delete(srv.url(&format!("/users/{}", tenant.owner_id)))
        .bearer_auth(admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // nobody can be created as a second owner
    let res = srv
        .post(
            "/users",
            &tenant.token,
            json!({ "email": "owner2@owners.test", "name": "Owner 2", "role": "owner" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn webhook_redelivery_is_applied_once() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("billing").await;

    let checkout = json!({
        "id": "evt_checkout_1",
        "type": "checkout.session.completed",
        "created": Utc::now().timestamp(),
        "data": { "object": {
            "customer": "cus_42",
            "subscription": "sub_42",
            "metadata": { "organization_id": tenant.organization_id, "plan": "pro" }
        }}
    });

    let first = srv.deliver_webhook(&checkout).await;
    assert_eq!(first["outcome"], "applied");
    let second = srv.deliver_webhook(&checkout).await;
    assert_eq!(second["outcome"], "duplicate");

    let res = srv.get("/billing/subscription", &tenant.token).await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["subscription"]["plan"], "pro");
    assert_eq!(body["subscription"]["status"], "active");

    let res = srv.get("/audit?action=subscription.changed", &tenant.token).await;
    let audit: Value = res.json().await.unwrap();
    assert_eq!(audit["entries"].as_array().unwrap().len(), 1);

    let deleted = json!({
        "id": "evt_deleted_1",
        "type": "customer.subscription.deleted",
        "created": Utc::now().timestamp(),
        "data": { "object": { "id": "sub_42", "customer": "cus_42" } }
    });
    assert_eq!(srv.deliver_webhook(&deleted).await["outcome"], "applied");

    let res = srv.get("/billing/subscription", &tenant.token).await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["subscription"]["plan"], "starter");
    assert_eq!(body["subscription"]["status"], "canceled");
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .post(srv.url("/billing/webhook"))
        .header("stripe-signature", format!("t={},v1=deadbeef", Utc::now().timestamp()))
        .body(r#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{}}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "invalid_signature");

    let res = srv
        .client
        .post(srv.url("/billing/webhook"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn explain_reports_missing_capabilities() {
    let srv = TestServer::spawn().await;
    let tenant = srv.register("explain").await;

    let res = srv.get("/rbac/explain?capability=plants:create", &tenant.token).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.get("/rbac/roles", &tenant.token).await;
    assert_eq!(res.status(), StatusCode::OK);
}
