//! End-to-end scenarios through a full client instance: channel in, cache
//! and queue in the middle, mock HTTP at the bottom.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::time::timeout;

use webtile::channel::{BoxFuture, ClientEnd};
use webtile::{
    ChannelFactory, ClientConfig, FetchError, HttpClient, InMemoryChannels, InstanceRegistry,
};

const IMAGE_REQUEST: &str =
    "1getimage|R1|tile.example|/wms|roads|default|image/png|256|45000000|-75000000|100000|5";

/// Mock HTTP client returning scripted responses in order; the last response
/// repeats once the script runs out.
struct ScriptedHttp {
    responses: Mutex<Vec<Result<Vec<u8>, FetchError>>>,
    last: Result<Vec<u8>, FetchError>,
    calls: Mutex<usize>,
}

impl ScriptedHttp {
    fn new(responses: Vec<Result<Vec<u8>, FetchError>>) -> Arc<Self> {
        let last = responses
            .last()
            .cloned()
            .unwrap_or(Err(FetchError::Http("unscripted".to_string())));
        Arc::new(Self {
            responses: Mutex::new(responses),
            last,
            calls: Mutex::new(0),
        })
    }

    fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

impl HttpClient for ScriptedHttp {
    fn get<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        *self.calls.lock() += 1;
        let mut responses = self.responses.lock();
        let response = if responses.is_empty() {
            self.last.clone()
        } else {
            responses.remove(0)
        };
        Box::pin(async move { response })
    }
}

struct Harness {
    channels: Arc<InMemoryChannels>,
    registry: InstanceRegistry,
    _cache_dir: TempDir,
}

fn harness(http: Arc<ScriptedHttp>) -> Harness {
    let cache_dir = TempDir::new().unwrap();
    let channels = Arc::new(InMemoryChannels::new());

    let mut config = ClientConfig::new(cache_dir.path());
    config.retry_delay = Duration::from_millis(20);

    let registry = InstanceRegistry::with_http_client(config, channels.clone(), http);
    Harness {
        channels,
        registry,
        _cache_dir: cache_dir,
    }
}

async fn recv(client: &mut ClientEnd) -> String {
    timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

async fn recv_server(server: &mut Box<dyn webtile::ServerChannel>) -> String {
    timeout(Duration::from_secs(2), server.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

#[tokio::test]
async fn getimage_miss_downloads_then_serves_from_cache() {
    let http = ScriptedHttp::new(vec![Ok(b"\x89PNGbytes".to_vec())]);
    let mut h = harness(http.clone());

    let mut reply = h.channels.create_server("R1").unwrap();
    let id = h.registry.create().unwrap();
    let pipe = h.registry.channel_name(id).unwrap().to_string();
    let instance = h.channels.connect(&pipe).unwrap();

    // Cold cache: the gateway acknowledges the download and defers the fetch.
    instance.send(IMAGE_REQUEST).unwrap();
    assert_eq!(
        recv_server(&mut reply).await,
        "<download> -75000000 45000000 5"
    );

    // The processor fetches asynchronously and reports the file.
    let file = recv_server(&mut reply).await;
    assert!(file.starts_with("<file> -75000000 45000000 5 "));
    assert!(file.ends_with(".png"));
    assert_eq!(http.call_count(), 1);

    // The tile and its sidecar are on disk at the reported path.
    let path = file.rsplit(' ').next().unwrap();
    assert!(std::path::Path::new(path).is_file());
    assert!(std::path::Path::new(&path.replace(".png", ".wld")).is_file());

    // Warm cache: immediate <file> reply, no queueing, no extra fetch.
    instance.send(IMAGE_REQUEST).unwrap();
    let cached = recv_server(&mut reply).await;
    assert!(cached.starts_with("<file> -75000000 45000000 5 "));
    assert_eq!(http.call_count(), 1);
    assert_eq!(h.registry.get(id).unwrap().pending_requests(), 0);

    h.registry.destroy(id).await.unwrap();
}

#[tokio::test]
async fn xml_error_body_retries_until_server_recovers() {
    // First attempt gets a server error document, the retry succeeds.
    let http = ScriptedHttp::new(vec![
        Ok(b"<?xml version=\"1.0\"?><ServiceException/>".to_vec()),
        Ok(b"\x89PNGbytes".to_vec()),
    ]);
    let mut h = harness(http.clone());

    let mut reply = h.channels.create_server("R1").unwrap();
    let id = h.registry.create().unwrap();
    let pipe = h.registry.channel_name(id).unwrap().to_string();
    let instance = h.channels.connect(&pipe).unwrap();

    instance.send(IMAGE_REQUEST).unwrap();
    assert_eq!(recv_server(&mut reply).await, "<download> -75000000 45000000 5");

    // No error message per failed attempt; the next delivery is the file.
    let file = recv_server(&mut reply).await;
    assert!(file.starts_with("<file> "));
    assert_eq!(http.call_count(), 2);

    h.registry.destroy(id).await.unwrap();
}

#[tokio::test]
async fn findinfo_and_capabilities_answer_on_instance_channel() {
    let http = ScriptedHttp::new(vec![
        Ok(b"<geodata>\n<latt>45.5</latt>\n<longt>-73.5</longt>\n</geodata>".to_vec()),
        Ok(b"<WMT_MS_Capabilities/>".to_vec()),
    ]);
    let mut h = harness(http);

    let id = h.registry.create().unwrap();
    let pipe = h.registry.channel_name(id).unwrap().to_string();
    let mut instance = h.channels.connect(&pipe).unwrap();

    instance.send("5findinfo|geo.example|Ottawa Canada").unwrap();
    assert_eq!(recv(&mut instance).await, "<found> 45.5 -73.5");

    instance
        .send("5getcapabilities|tile.example|/wms|x")
        .unwrap();
    assert_eq!(recv(&mut instance).await, "<complete>");

    instance.send("5nosuchcommand|arg").unwrap();
    assert_eq!(recv(&mut instance).await, "<unknowncommand>");

    h.registry.destroy(id).await.unwrap();
}

#[tokio::test]
async fn findinfo_failure_reports_no_data_once() {
    let http = ScriptedHttp::new(vec![Err(FetchError::Http("unreachable".to_string()))]);
    let mut h = harness(http.clone());

    let id = h.registry.create().unwrap();
    let pipe = h.registry.channel_name(id).unwrap().to_string();
    let mut instance = h.channels.connect(&pipe).unwrap();

    instance.send("5findinfo|geo.example|Nowhere").unwrap();
    assert_eq!(recv(&mut instance).await, "<error> NO DATA FROM SERVER");

    // Geocode failures are not retried.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(http.call_count(), 1);

    h.registry.destroy(id).await.unwrap();
}

#[tokio::test]
async fn terminate_stops_instance_with_pending_requests() {
    // Fetches never complete, so queued requests stay pending.
    let http = ScriptedHttp::new(vec![Ok(
        b"<?xml version=\"1.0\"?><ServiceException/>".to_vec()
    )]);
    let mut h = harness(http);

    let mut reply = h.channels.create_server("R1").unwrap();
    let id = h.registry.create().unwrap();
    let pipe = h.registry.channel_name(id).unwrap().to_string();
    let mut instance = h.channels.connect(&pipe).unwrap();

    for lat in ["45000000", "46000000", "47000000"] {
        let request = format!(
            "1getimage|R1|tile.example|/wms|roads|default|image/png|256|{}|-75000000|100000|5",
            lat
        );
        instance.send(&request).unwrap();
        let ack = recv_server(&mut reply).await;
        assert!(ack.starts_with("<download> "));
    }

    instance.send("terminate").unwrap();
    assert_eq!(recv(&mut instance).await, "OK");

    // Destroy returns only after both units have exited.
    timeout(Duration::from_secs(2), h.registry.destroy(id))
        .await
        .expect("destroy did not complete")
        .unwrap();
    assert_eq!(h.registry.channel_name(id), None);
}

/// HTTP client whose requests never complete, pinning the processor on its
/// first fetch so the queue state stays put.
struct HangingHttp;

impl HttpClient for HangingHttp {
    fn get<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        Box::pin(std::future::pending())
    }
}

#[tokio::test]
async fn removerequests_drops_only_matching_entries() {
    let cache_dir = TempDir::new().unwrap();
    let channels = Arc::new(InMemoryChannels::new());
    let mut config = ClientConfig::new(cache_dir.path());
    config.retry_delay = Duration::from_millis(20);
    let mut h = Harness {
        registry: InstanceRegistry::with_http_client(
            config,
            channels.clone(),
            Arc::new(HangingHttp),
        ),
        channels,
        _cache_dir: cache_dir,
    };

    let mut r1 = h.channels.create_server("R1").unwrap();
    let mut r2 = h.channels.create_server("R2").unwrap();
    let id = h.registry.create().unwrap();
    let pipe = h.registry.channel_name(id).unwrap().to_string();
    let mut instance = h.channels.connect(&pipe).unwrap();

    for (reply_channel, lat) in [("R1", "45000000"), ("R2", "46000000"), ("R1", "47000000")] {
        let request = format!(
            "1getimage|{}|tile.example|/wms|roads|default|image/png|256|{}|-75000000|100000|5",
            reply_channel, lat
        );
        instance.send(&request).unwrap();
    }
    let _ = recv_server(&mut r1).await;
    let _ = recv_server(&mut r2).await;
    let _ = recv_server(&mut r1).await;

    // Let the processor pull the first entry and block on its fetch; the
    // other two stay queued.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.registry.get(id).unwrap().pending_requests(), 2);

    instance.send("removerequests R1").unwrap();
    assert_eq!(recv(&mut instance).await, "OK");

    // The queued R1 entry is gone, the R2 entry survives.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.registry.get(id).unwrap().pending_requests(), 1);

    h.registry.destroy(id).await.unwrap();
}

#[tokio::test]
async fn stats_channel_receives_instance_and_pending_count() {
    let http = ScriptedHttp::new(vec![Ok(b"\x89PNGbytes".to_vec())]);
    let mut h = harness(http);

    let mut stats = h.channels.create_server("WebDataSourceStatsPipe").unwrap();
    let mut reply = h.channels.create_server("R1").unwrap();
    let id = h.registry.create().unwrap();
    let pipe = h.registry.channel_name(id).unwrap().to_string();
    let instance = h.channels.connect(&pipe).unwrap();

    instance.send(IMAGE_REQUEST).unwrap();
    let _ = recv_server(&mut reply).await;

    let message = recv_server(&mut stats).await;
    let (reported_id, _count) = message.split_once(',').expect("malformed stats message");
    assert_eq!(reported_id, id.to_string());

    h.registry.destroy(id).await.unwrap();
}
