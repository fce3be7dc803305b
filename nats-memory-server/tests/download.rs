use nats_memory_server::{Error, ProxyOptions, download_file};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn attachment(name: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-disposition", format!("attachment; filename=\"{name}\"").as_str())
        .set_body_bytes(b"archive-bytes".to_vec())
}

fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn file_lands_under_the_header_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/nats.zip"))
        .respond_with(attachment("nats-server-v2.9.16-linux-amd64.zip"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = download_file(&format!("{}/nats.zip", server.uri()), dir.path(), &ProxyOptions::default())
        .await
        .unwrap();

    assert_eq!(file, dir.path().join("nats-server-v2.9.16-linux-amd64.zip"));
    assert!(file.is_absolute());
    assert_eq!(std::fs::read(&file).unwrap(), b"archive-bytes");
    // no temporary files are left behind
    assert_eq!(dir_entries(dir.path()), ["nats-server-v2.9.16-linux-amd64.zip"]);
}

#[tokio::test]
async fn traversal_in_header_is_reduced_to_the_last_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(attachment("../../../etc/passwd"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = download_file(&server.uri(), dir.path(), &ProxyOptions::default())
        .await
        .unwrap();

    assert_eq!(file, dir.path().join("passwd"));
    assert_eq!(dir_entries(dir.path()), ["passwd"]);
}

#[tokio::test]
async fn dot_dot_name_is_rejected_without_writing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(attachment(".."))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = download_file(&server.uri(), dir.path(), &ProxyOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PathTraversalDetected { .. }), "{err:?}");
    assert!(err.to_string().starts_with("Invalid file path"));
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn missing_content_disposition() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = download_file(&server.uri(), dir.path(), &ProxyOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingFilename { .. }), "{err:?}");
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let url = format!("{}/missing.zip", server.uri());
    let err = download_file(&url, dir.path(), &ProxyOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::DownloadFailed { url: u, status } => {
            assert_eq!(u, url);
            assert_eq!(status, "Not Found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn redirects_are_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases/latest.zip"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", format!("{}/objects/abc123", server.uri()).as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/objects/abc123"))
        .respond_with(attachment("nats.zip"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = download_file(
        &format!("{}/releases/latest.zip", server.uri()),
        dir.path(),
        &ProxyOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(file, dir.path().join("nats.zip"));
}

#[tokio::test]
async fn missing_directory_is_created() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(attachment("nats.zip"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("cache/nats");
    let file = download_file(&server.uri(), &nested, &ProxyOptions::default())
        .await
        .unwrap();

    assert_eq!(file, nested.join("nats.zip"));
    assert!(file.is_file());
}

#[tokio::test]
async fn http_requests_go_through_the_proxy() {
    // the mock server plays the proxy, the target host does not exist
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/archive.zip"))
        .respond_with(attachment("proxied.zip"))
        .expect(1)
        .mount(&proxy)
        .await;

    let options = ProxyOptions {
        http_proxy: Some(proxy.uri()),
        ..Default::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let file = download_file("http://nats-mirror.invalid/archive.zip", dir.path(), &options)
        .await
        .unwrap();

    assert_eq!(file, dir.path().join("proxied.zip"));
}

#[tokio::test]
async fn no_proxy_hosts_bypass_the_proxy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(attachment("direct.zip"))
        .mount(&server)
        .await;

    // nothing listens on the discard port, going through it would fail
    let options = ProxyOptions {
        http_proxy: Some("http://127.0.0.1:9".to_string()),
        no_proxy: Some("127.0.0.1,localhost".to_string()),
        ..Default::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let file = download_file(&server.uri(), dir.path(), &options)
        .await
        .unwrap();

    assert_eq!(file, dir.path().join("direct.zip"));
}

#[tokio::test]
async fn invalid_proxy_url() {
    let options = ProxyOptions {
        https_proxy: Some("not a url".to_string()),
        ..Default::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let err = download_file("https://example.invalid/x.zip", dir.path(), &options)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidProxy { .. }), "{err:?}");
}
