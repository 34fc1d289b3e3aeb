use core::{net::SocketAddr, time::Duration};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use stitchd_core::{
    BandInfo, EngineInput, Error, Image, InferenceEngine, PixelType, RasterMetadata,
    RasterProvider, Request, RequestBatch, Response, Result,
};
use stitchd_server::{
    client::Client,
    server::{
        config::ServerConfig, listener::serve_with_shutdown, service::handler::ImputeService,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
};

const GEOTRANSFORM: [f64; 6] = [-120.5, 0.0001, 0.0, 37.25, 0.0, -0.0001];

#[derive(Clone, Default)]
struct EchoEngine {
    batches: Arc<Mutex<Vec<usize>>>,
}

impl InferenceEngine for EchoEngine {
    fn impute(&mut self, inputs: &[EngineInput]) -> Result<Vec<Image>> {
        self.batches.lock().unwrap().push(inputs.len());
        Ok(inputs
            .iter()
            .map(|input| Image::filled(2, 2, 1, input.timestamp as u8))
            .collect())
    }
}

struct FailingEngine;

impl InferenceEngine for FailingEngine {
    fn impute(&mut self, _inputs: &[EngineInput]) -> Result<Vec<Image>> {
        Err(Error::Engine {
            reason: "device lost".to_string(),
        })
    }
}

struct SlowEngine(Duration);

impl InferenceEngine for SlowEngine {
    fn impute(&mut self, inputs: &[EngineInput]) -> Result<Vec<Image>> {
        std::thread::sleep(self.0);
        Ok(inputs.iter().map(|_| Image::filled(2, 2, 1, 0)).collect())
    }
}

struct EmptyEngine;

impl InferenceEngine for EmptyEngine {
    fn impute(&mut self, inputs: &[EngineInput]) -> Result<Vec<Image>> {
        inputs
            .iter()
            .map(|_| Image::new(0, 0, 1, Vec::new()))
            .collect()
    }
}

struct MapRasters(HashMap<String, RasterMetadata>);

impl RasterProvider for MapRasters {
    fn metadata(&self, path: &str) -> Result<RasterMetadata> {
        self.0.get(path).cloned().ok_or_else(|| Error::Raster {
            path: path.to_string(),
            reason: "no such raster".to_string(),
        })
    }
}

fn raster(width: u32, height: u32, pixel_type: PixelType) -> RasterMetadata {
    RasterMetadata {
        width,
        height,
        geotransform: GEOTRANSFORM,
        projection: "EPSG:4326".to_string(),
        bands: vec![BandInfo {
            pixel_type,
            no_data: Some(0.0),
        }],
    }
}

fn rasters() -> Arc<dyn RasterProvider> {
    Arc::new(MapRasters(HashMap::from([
        ("/s2/a.tif".to_string(), raster(4, 4, PixelType::Byte)),
        ("/s2/wide.tif".to_string(), raster(6, 2, PixelType::Byte)),
        ("/s2/u16.tif".to_string(), raster(4, 4, PixelType::UInt16)),
    ])))
}

fn config(max_batch_size: usize, job_timeout: Duration) -> ServerConfig {
    ServerConfig {
        server_addr: "127.0.0.1:0".parse().unwrap(),
        geohashes: vec!["9q6qr".to_string(), "9q6qp".to_string()],
        model: PathBuf::from("unused.json"),
        weights: PathBuf::from("unused.weights"),
        thread_count: 8,
        max_batch_size,
        read_timeout: Duration::from_secs(5),
        job_timeout,
        shutdown_timeout: Duration::from_secs(1),
    }
}

fn request(geohash: &str, timestamp: i64, source: &str) -> Request {
    Request {
        geohash: geohash.to_string(),
        timestamp,
        source_image_paths: vec![source.to_string(), "/s2/other.tif".to_string()],
        reference_image_path: "/modis/m.tif".to_string(),
    }
}

struct Server {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl Server {
    async fn start<E: InferenceEngine>(engine: E, config: ServerConfig) -> Self {
        let listener = TcpListener::bind(config.server_addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = ImputeService::new(&config, engine, rasters());
        let (stop, stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(serve_with_shutdown(
            listener,
            service,
            config.thread_count,
            async move {
                let _ = stopped.await;
            },
        ));

        Self { addr, stop, handle }
    }

    fn client(&self) -> Client {
        Client::new(self.addr)
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        self.handle.await.unwrap().unwrap();
    }
}

fn failure(response: Response) -> String {
    match response {
        Response::Failure(message) => message,
        Response::Success(rasters) => panic!("expected failure, got {} raster(s)", rasters.len()),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_get_their_own_images() {
    let server = Server::start(EchoEngine::default(), config(10, Duration::from_secs(5))).await;
    let client = server.client();

    let (first, second) = tokio::join!(
        client.impute(request("9q6qp", 3, "/s2/a.tif")),
        client.impute(request("9q6qr", 9, "/s2/wide.tif")),
    );

    for (response, timestamp, (width, height)) in
        [(first, 3_u8, (4, 4)), (second, 9_u8, (6, 2))]
    {
        let Response::Success(rasters) = response.unwrap() else {
            panic!("expected success");
        };
        assert_eq!(rasters.len(), 1);
        let raster = &rasters[0];
        assert_eq!((raster.metadata.width, raster.metadata.height), (width, height));
        assert_eq!(raster.metadata.geotransform, GEOTRANSFORM);
        assert_eq!(raster.metadata.bands[0].no_data, Some(0.0));
        assert_eq!((raster.image.width(), raster.image.height()), (width, height));
        assert!(raster.image.pixels().iter().all(|&p| p == timestamp));
    }

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engine_failure_answers_every_client() {
    let server = Server::start(FailingEngine, config(10, Duration::from_secs(5))).await;
    let client = server.client();

    let responses = futures::future::join_all(
        (0..3).map(|i| client.impute(request("9q6qp", i, "/s2/a.tif"))),
    )
    .await;

    for response in responses {
        assert!(failure(response.unwrap()).contains("device lost"));
    }

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn large_request_is_split_into_capped_batches() {
    let engine = EchoEngine::default();
    let server = Server::start(engine.clone(), config(10, Duration::from_secs(5))).await;

    let batch = RequestBatch::new(
        (0..25)
            .map(|i| request("9q6qp", i, "/s2/a.tif"))
            .collect(),
    );
    let Response::Success(rasters) = server.client().submit(batch).await.unwrap() else {
        panic!("expected success");
    };

    assert_eq!(rasters.len(), 25);
    for (i, raster) in rasters.iter().enumerate() {
        assert_eq!(raster.image.pixels()[0], i as u8);
    }

    let batches = engine.batches.lock().unwrap().clone();
    assert_eq!(batches.iter().sum::<usize>(), 25);
    assert!(batches.iter().all(|&size| size <= 10));

    server.stop().await;
}

#[tokio::test]
async fn empty_batch_gets_bare_success() {
    let server = Server::start(EchoEngine::default(), config(10, Duration::from_secs(5))).await;

    let response = server.client().submit(RequestBatch::default()).await.unwrap();
    assert_eq!(response, Response::Success(Vec::new()));

    server.stop().await;
}

#[tokio::test]
async fn unsupported_pixel_type_becomes_failure_response() {
    let server = Server::start(EchoEngine::default(), config(10, Duration::from_secs(5))).await;

    let response = server
        .client()
        .impute(request("9q6qp", 1, "/s2/u16.tif"))
        .await
        .unwrap();
    assert!(failure(response).contains("unsupported pixel type"));

    server.stop().await;
}

#[tokio::test]
async fn unknown_geohash_and_missing_raster_are_reported() {
    let server = Server::start(EchoEngine::default(), config(10, Duration::from_secs(5))).await;
    let client = server.client();

    let unknown = client.impute(request("dr5ru", 1, "/s2/a.tif")).await.unwrap();
    assert!(failure(unknown).contains("dr5ru"));

    let missing = client
        .impute(request("9q6qp", 1, "/s2/missing.tif"))
        .await
        .unwrap();
    assert!(failure(missing).contains("/s2/missing.tif"));

    server.stop().await;
}

#[tokio::test]
async fn truncated_request_gets_failure_status() {
    let server = Server::start(EchoEngine::default(), config(10, Duration::from_secs(5))).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(&[0x01, 0x05, b'9', b'q']).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();

    assert_eq!(reply[0], 1);
    let message = std::str::from_utf8(&reply[2..]).unwrap();
    assert_eq!(reply[1] as usize, message.len());
    assert!(message.contains("truncated geohash"));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_engine_times_out() {
    let server = Server::start(
        SlowEngine(Duration::from_millis(300)),
        config(10, Duration::from_millis(50)),
    )
    .await;

    let response = server
        .client()
        .impute(request("9q6qp", 1, "/s2/a.tif"))
        .await
        .unwrap();
    assert!(failure(response).contains("Timed out"));

    server.stop().await;
}

#[tokio::test]
async fn empty_engine_image_becomes_failure_response() {
    let server = Server::start(EmptyEngine, config(10, Duration::from_secs(5))).await;

    let response = server
        .client()
        .impute(request("9q6qp", 1, "/s2/a.tif"))
        .await
        .unwrap();
    assert!(failure(response).contains("empty 0x0x1 image"));

    server.stop().await;
}

#[tokio::test]
async fn silent_peer_is_answered_and_releases_its_permit() {
    let mut config = config(10, Duration::from_secs(5));
    config.thread_count = 1;
    config.read_timeout = Duration::from_millis(100);
    let server = Server::start(EchoEngine::default(), config).await;

    // Holds the only permit without ever sending a byte.
    let mut idle = TcpStream::connect(server.addr).await.unwrap();
    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), idle.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reply[0], 1);
    let message = std::str::from_utf8(&reply[2..]).unwrap();
    assert!(message.contains("waiting for a request"));

    let response = server
        .client()
        .impute(request("9q6qp", 4, "/s2/a.tif"))
        .await
        .unwrap();
    assert!(matches!(response, Response::Success(_)));

    server.stop().await;
}
