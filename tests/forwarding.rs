use registry_uplink::{
    client::{MetadataOptions, UplinkClient},
    config::{AuthConfig, MainConfig, StringOrVec, UplinkConfig},
};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn main_config() -> MainConfig {
    MainConfig::new("registry/1.0.0", "srv-test")
}

async fn mount_manifest(server: &MockServer, package: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{package}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": package})))
        .mount(server)
        .await;
}

async fn only_request(server: &MockServer) -> wiremock::Request {
    let mut requests = server.received_requests().await.expect("requests");
    assert_eq!(requests.len(), 1);
    requests.remove(0)
}

#[tokio::test]
async fn direct_requests_carry_via_and_forwarded_for() {
    let server = MockServer::start().await;
    mount_manifest(&server, "lodash").await;

    let client =
        UplinkClient::new("npmjs", &UplinkConfig::new(server.uri()), &main_config())
            .expect("client");

    let mut incoming = HeaderMap::new();
    incoming.insert("via", HeaderValue::from_static("1.1 edge"));
    incoming.insert("x-forwarded-for", HeaderValue::from_static("192.0.2.1"));

    client
        .get_remote_metadata(
            "lodash",
            &MetadataOptions {
                remote_address: Some("10.0.0.9".to_string()),
                headers: Some(incoming),
                ..MetadataOptions::default()
            },
        )
        .await
        .expect("manifest");

    let request = only_request(&server).await;
    let via = request.headers.get("via").expect("via").to_str().expect("ascii");
    assert_eq!(via, "1.1 edge, 1.1 srv-test (Verdaccio)");
    let forwarded = request
        .headers
        .get("x-forwarded-for")
        .expect("x-forwarded-for")
        .to_str()
        .expect("ascii");
    assert_eq!(forwarded, "192.0.2.1, 10.0.0.9");
    let user_agent = request
        .headers
        .get("user-agent")
        .expect("user-agent")
        .to_str()
        .expect("ascii");
    assert!(user_agent.contains("npm"));
    assert_eq!(
        request.headers.get("accept").expect("accept"),
        "application/json;"
    );
}

#[tokio::test]
async fn configured_bearer_token_is_injected() {
    let server = MockServer::start().await;
    mount_manifest(&server, "secure").await;

    let mut config = UplinkConfig::new(server.uri());
    config.auth = Some(AuthConfig {
        kind: "bearer".to_string(),
        token: Some("hunter2".to_string()),
        token_env: None,
    });
    let client = UplinkClient::new("npmjs", &config, &main_config()).expect("client");

    client
        .get_remote_metadata("secure", &MetadataOptions::default())
        .await
        .expect("manifest");

    let request = only_request(&server).await;
    assert_eq!(
        request.headers.get("authorization").expect("authorization"),
        "Bearer hunter2"
    );
}

#[tokio::test]
async fn explicit_proxy_suppresses_forwarded_for() {
    // The mock server plays the proxy: the uplink host is never resolved
    // and the absolute-form request lands here.
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lodash"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "lodash"})))
        .mount(&proxy)
        .await;

    let mut config = UplinkConfig::new("http://upstream-under-test.invalid");
    config.http_proxy = Some(proxy.uri());
    let client = UplinkClient::new("npmjs", &config, &main_config()).expect("client");
    assert_eq!(client.proxy_url(), Some(proxy.uri().as_str()));

    client
        .get_remote_metadata(
            "lodash",
            &MetadataOptions {
                remote_address: Some("10.0.0.9".to_string()),
                ..MetadataOptions::default()
            },
        )
        .await
        .expect("manifest through proxy");

    let request = only_request(&proxy).await;
    assert!(request.headers.get("x-forwarded-for").is_none());
    assert!(request.headers.get("via").is_some());
}

#[tokio::test]
async fn no_proxy_match_restores_the_direct_path() {
    let server = MockServer::start().await;
    mount_manifest(&server, "lodash").await;

    let mut config = UplinkConfig::new(server.uri());
    // Dead proxy: if the exclusion failed, the request could not succeed.
    config.http_proxy = Some("http://127.0.0.1:9".to_string());
    config.no_proxy = Some(StringOrVec::One("127.0.0.1".to_string()));
    let client = UplinkClient::new("npmjs", &config, &main_config()).expect("client");
    assert_eq!(client.proxy_url(), None);

    client
        .get_remote_metadata(
            "lodash",
            &MetadataOptions {
                remote_address: Some("10.0.0.9".to_string()),
                ..MetadataOptions::default()
            },
        )
        .await
        .expect("direct manifest");

    let request = only_request(&server).await;
    assert_eq!(
        request
            .headers
            .get("x-forwarded-for")
            .expect("x-forwarded-for"),
        "10.0.0.9"
    );
}

#[tokio::test]
async fn config_header_overrides_reach_the_wire() {
    let server = MockServer::start().await;
    mount_manifest(&server, "lodash").await;

    let mut config = UplinkConfig::new(server.uri());
    config
        .headers
        .insert("x-registry-tier".to_string(), "mirror".to_string());
    let client = UplinkClient::new("npmjs", &config, &main_config()).expect("client");

    client
        .get_remote_metadata("lodash", &MetadataOptions::default())
        .await
        .expect("manifest");

    let request = only_request(&server).await;
    assert_eq!(
        request.headers.get("x-registry-tier").expect("override"),
        "mirror"
    );
}
