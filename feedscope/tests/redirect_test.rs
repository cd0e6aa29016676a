use std::time::Duration;

use feedscope::redirect::RedirectResolver;

fn resolver() -> RedirectResolver {
    RedirectResolver::new(Duration::from_secs(2), "feedscope-test/0.1").unwrap()
}

#[tokio::test]
async fn test_redirect_chain_resolves_via_head() {
    let mut server = mockito::Server::new_async().await;

    let hop = server
        .mock("HEAD", "/start")
        .with_status(301)
        .with_header("Location", "/final")
        .create_async()
        .await;
    let target = server.mock("HEAD", "/final").with_status(200).create_async().await;

    let (url, notes) = resolver().resolve(&format!("{}/start", server.url())).await;

    assert_eq!(url, format!("{}/final", server.url()));
    assert_eq!(notes, vec!["resolved_redirects".to_string()]);

    hop.assert_async().await;
    target.assert_async().await;
}

#[tokio::test]
async fn test_unredirected_url_has_no_notes() {
    let mut server = mockito::Server::new_async().await;

    let mock = server.mock("HEAD", "/direct").with_status(200).create_async().await;

    let (url, notes) = resolver().resolve(&format!("{}/direct", server.url())).await;

    assert_eq!(url, format!("{}/direct", server.url()));
    assert!(notes.is_empty());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_head_rejection_falls_back_to_get() {
    let mut server = mockito::Server::new_async().await;

    let head = server.mock("HEAD", "/article").with_status(405).expect(1).create_async().await;
    let get = server
        .mock("GET", "/article")
        .with_status(200)
        .with_body("large body that should never matter")
        .expect(1)
        .create_async()
        .await;

    let (url, notes) = resolver().resolve(&format!("{}/article", server.url())).await;

    assert_eq!(url, format!("{}/article", server.url()));
    assert!(notes.is_empty());

    head.assert_async().await;
    get.assert_async().await;
}

#[tokio::test]
async fn test_head_403_also_falls_back_to_get() {
    let mut server = mockito::Server::new_async().await;

    server.mock("HEAD", "/guarded").with_status(403).create_async().await;
    let get = server
        .mock("GET", "/guarded")
        .with_status(302)
        .with_header("Location", "/open")
        .create_async()
        .await;
    server.mock("GET", "/open").with_status(200).create_async().await;

    let (url, notes) = resolver().resolve(&format!("{}/guarded", server.url())).await;

    assert_eq!(url, format!("{}/open", server.url()));
    assert_eq!(notes, vec!["resolved_redirects".to_string()]);

    get.assert_async().await;
}

#[tokio::test]
async fn test_total_failure_keeps_url_with_note() {
    // Nothing listens on port 1, so HEAD and the GET fallback both fail.
    let (url, notes) = resolver().resolve("http://127.0.0.1:1/article").await;

    assert_eq!(url, "http://127.0.0.1:1/article");
    assert_eq!(notes, vec!["redirect_failed:CONNECTION_REFUSED".to_string()]);
}
