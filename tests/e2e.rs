//! Browser-backed end-to-end checks.
//!
//! These need a local Chrome/Chromium (or network access for the managed
//! download), so they are `#[ignore]`d by default:
//!
//! ```sh
//! cargo test --test e2e -- --ignored
//! ```

use std::io::{Read, Write};
use std::net::TcpListener;

use webpilot::{Config, Operator, PerformRequest, PerformResponse};

/// A small self-contained page: three interactive elements in a known
/// layout, one relative image reference for the normalizer to resolve.
const FIXTURE_HTML: &str = r#"<html><head><title>fixture</title></head><body>
<a id="top-link" href="/docs" style="position:absolute;top:10px;left:10px;width:120px;height:30px;display:block">Docs</a>
<input placeholder="Search" style="position:absolute;top:60px;left:10px;width:200px;height:30px">
<button class="cta" style="position:absolute;top:60px;left:240px;width:80px;height:30px">Go</button>
<img src="logo.png" alt="">
</body></html>"#;

/// One-shot fixture origin: every GET gets the page back. Runs on a plain
/// std listener thread so the test needs no server dependency.
fn serve_fixture() -> String {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture server");
    let addr = listener.local_addr().expect("local addr");

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                FIXTURE_HTML.len(),
                FIXTURE_HTML
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    format!("http://{addr}/app/")
}

async fn observe(operator: &Operator, url: &str) -> webpilot::PageObservation {
    match operator
        .perform(PerformRequest::observe(url))
        .await
        .expect("perform")
    {
        PerformResponse::Page(observation) => observation,
        PerformResponse::Reset(_) => panic!("unexpected reset ack"),
    }
}

#[tokio::test]
#[ignore = "requires a local Chrome/Chromium"]
async fn observation_orders_markers_in_reading_order() {
    let base = serve_fixture();
    let operator = Operator::new(&Config::default());

    let observation = observe(&operator, &base).await;

    assert_eq!(observation.markers.len(), 3);
    assert_eq!(observation.markers[0].label, "a");
    assert_eq!(observation.markers[0].selector, "a#top-link");
    assert_eq!(observation.markers[1].label, "input");
    assert_eq!(observation.markers[1].content, "Search");
    assert_eq!(observation.markers[2].label, "button");
    assert!(!observation.screenshot.is_empty());

    // Overlays were cleaned up before the markup was serialized.
    assert!(!observation.html.contains("2147483647"));

    operator.reset().await;
}

#[tokio::test]
#[ignore = "requires a local Chrome/Chromium"]
async fn normalization_absolutizes_relative_references() {
    let base = serve_fixture();
    let operator = Operator::new(&Config::default());

    let observation = observe(&operator, &base).await;

    let expected = format!("{base}logo.png");
    assert!(
        observation.html.contains(&expected),
        "img src should resolve against the page base: wanted {expected}"
    );

    operator.reset().await;
}

#[tokio::test]
#[ignore = "requires a local Chrome/Chromium"]
async fn repeated_observation_of_an_unchanged_page_is_identical() {
    let base = serve_fixture();
    let operator = Operator::new(&Config::default());

    let first = observe(&operator, &base).await.markers;

    let second = match operator
        .perform(PerformRequest::actions(None, Vec::new()))
        .await
        .expect("perform")
    {
        PerformResponse::Page(observation) => observation.markers,
        PerformResponse::Reset(_) => panic!("unexpected reset ack"),
    };

    assert_eq!(first, second);

    operator.reset().await;
}

#[tokio::test]
#[ignore = "requires a local Chrome/Chromium"]
async fn answer_halts_the_rest_of_the_batch() {
    let base = serve_fixture();
    let operator = Operator::new(&Config::default());

    observe(&operator, &base).await;

    // The out-of-range Click after ANSWER must never execute, so this
    // perform succeeds instead of failing resolution.
    let response = operator
        .perform(PerformRequest::actions(
            None,
            vec!["ANSWER; done".into(), "Click [99]".into()],
        ))
        .await
        .expect("perform");
    assert!(matches!(response, PerformResponse::Page(_)));

    operator.reset().await;
}

#[tokio::test]
#[ignore = "requires a local Chrome/Chromium"]
async fn reset_round_trip_acknowledges_without_observation() {
    let base = serve_fixture();
    let operator = Operator::new(&Config::default());

    observe(&operator, &base).await;

    let ack = operator
        .perform(PerformRequest::reset())
        .await
        .expect("reset");
    assert!(matches!(ack, PerformResponse::Reset(_)));
    assert!(operator.markers().await.is_empty());
    assert!(!operator.session().is_live().await);
}
