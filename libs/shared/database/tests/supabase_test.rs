use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_database::SupabaseClient;
use shared_utils::test_utils::TestConfig;

#[tokio::test]
async fn ping_sends_anon_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .and(header("apikey", "test-anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let config = TestConfig::default().with_supabase_url(server.uri()).to_app_config();
    let client = SupabaseClient::new(&config);

    assert!(client.ping().await.is_ok());
}

#[tokio::test]
async fn ping_fails_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = TestConfig::default().with_supabase_url(server.uri()).to_app_config();
    let client = SupabaseClient::new(&config);

    let err = client.ping().await.unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn ping_without_url_is_an_error() {
    let config = TestConfig::default().with_supabase_url("").to_app_config();
    assert!(SupabaseClient::new(&config).ping().await.is_err());
}

#[tokio::test]
async fn ping_authorizes_with_anon_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .and(header("authorization", "Bearer test-anon-key"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = TestConfig::default().with_supabase_url(server.uri()).to_app_config();
    let latency = SupabaseClient::new(&config).ping().await.unwrap();
    assert!(latency < std::time::Duration::from_secs(5));
}
