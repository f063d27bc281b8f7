use std::io::Write;

use rdlhost::{HostError, HostService};
use tempfile::NamedTempFile;

fn fixture(ext: &str, contents: &[u8]) -> NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(ext).tempfile().unwrap();
    f.write_all(contents).unwrap();
    f.flush().unwrap();
    f
}

fn path_of(f: &NamedTempFile) -> String {
    f.path().to_str().unwrap().to_string()
}

#[tokio::test]
async fn two_clients_share_one_hosted_file() {
    let service = HostService::new();
    let image = fixture(".png", b"png-bytes");
    let source = path_of(&image);

    let url_a = service.add("127.0.0.1", "client-a", &source).await.unwrap();
    let url_b = service.add("127.0.0.1", "client-b", &source).await.unwrap();
    assert_eq!(url_a, url_b);

    let response = reqwest::get(&url_a).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "image/png"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"png-bytes");

    // First client leaves: the file stays hosted for the second one.
    assert!(service.remove("127.0.0.1", "client-a", &source).await);
    let response = reqwest::get(&url_a).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Last client leaves: file and server are gone, the listener is closed.
    assert!(service.remove("127.0.0.1", "client-b", &source).await);
    assert_eq!(service.server_count().await, 0);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(reqwest::get(&url_a).await.is_err());
}

#[tokio::test]
async fn lost_client_sweeps_only_its_files() {
    let service = HostService::new();
    let song = fixture(".mp3", b"mp3");
    let cover = fixture(".jpg", b"jpg");
    let other = fixture(".png", b"png");

    service
        .add("127.0.0.1", "client-x", &path_of(&song))
        .await
        .unwrap();
    service
        .add("127.0.0.1", "client-x", &path_of(&cover))
        .await
        .unwrap();
    let url_y = service
        .add("127.0.0.2", "client-y", &path_of(&other))
        .await
        .unwrap();

    assert_eq!(service.server_count().await, 2);

    service.lost_client("client-x").await;

    // client-x's server is gone, client-y's file is untouched.
    assert_eq!(service.server_count().await, 1);
    let response = reqwest::get(&url_y).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Removing client-x's files again reports failure: nothing is left.
    assert!(!service.remove("127.0.0.1", "client-x", &path_of(&song)).await);

    service.shutdown().await;
}

#[tokio::test]
async fn repeated_add_returns_same_url_and_remove_is_single_shot() {
    let service = HostService::new();
    let song = fixture(".flac", b"flac");
    let source = path_of(&song);

    let first = service.add("127.0.0.1", "client", &source).await.unwrap();
    let second = service.add("127.0.0.1", "client", &source).await.unwrap();
    assert_eq!(first, second);

    assert!(service.remove("127.0.0.1", "client", &source).await);
    assert!(!service.remove("127.0.0.1", "client", &source).await);
    assert!(!service.remove("127.0.0.1", "ghost", &source).await);
    assert_eq!(service.server_count().await, 0);
}

#[tokio::test]
async fn http_surface_rejects_what_it_must() {
    let service = HostService::new();
    let song = fixture(".wav", b"wav");
    let url = service
        .add("127.0.0.1", "client", &path_of(&song))
        .await
        .unwrap();

    let client = reqwest::Client::new();

    // Only GET is implemented.
    let response = client.post(&url).body("x").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 501);

    // Unknown paths under the prefix are 404.
    let base = url.rsplit_once('/').unwrap().0;
    let response = client
        .get(format!("{}/999.wav", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    service.shutdown().await;
}

#[tokio::test]
async fn add_failures_leave_no_empty_server() {
    let service = HostService::new();

    let err = service
        .add("127.0.0.1", "client", "/does/not/exist.png")
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::ObjectNotFound(_)));
    assert_eq!(service.server_count().await, 0);

    let odd = fixture(".zqzq", b"???");
    let err = service
        .add("127.0.0.1", "client", &path_of(&odd))
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::BadMime(_)));
    assert_eq!(service.server_count().await, 0);

    // An unresolvable interface address fails the host, not the daemon.
    let good = fixture(".png", b"png");
    let err = service
        .add("203.0.113.77", "client", &path_of(&good))
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::HostFailed(..)));
}
