//! The IO worker: one task per accepted connection.
//!
//! [`ImputeService`] holds everything a worker needs (geohash vocabulary,
//! raster provider, the dispatcher handle) and drives a connection from the
//! first request byte to the closed socket:
//!
//! 1. decode one request batch, bounded by the read timeout;
//! 2. turn each request into a job and hand them to the dispatcher on a
//!    fresh lane;
//! 3. wait, bounded by the job timeout, for every image;
//! 4. attach raster metadata and write the response.
//!
//! Anything that goes wrong is answered with a failure response when the
//! socket still works, logged, and kept away from other connections.

use crate::server::{
    config::ServerConfig,
    pool::{lane::Job, manager::DispatchPool},
    service::assemble::assemble,
    telemetry::{
        decrement_connections_inflight, increment_connections_inflight,
        increment_failed_responses, increment_protocol_errors, increment_request_items,
        record_connection_duration,
    },
};
use core::{net::SocketAddr, time::Duration};
use futures::{SinkExt, StreamExt};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};
use stitchd_core::{
    EngineInput, Error, GeohashEncoder, ImputedRaster, InferenceEngine, RasterProvider, Request,
    RequestBatch, Response, Result, protocol::ServerCodec,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::{sleep, timeout},
};
use tokio_util::codec::Framed;

#[derive(Clone)]
pub struct ImputeService {
    inner: Arc<Inner>,
}

struct Inner {
    encoder: GeohashEncoder,
    raster: Arc<dyn RasterProvider>,
    pool: DispatchPool,
    read_timeout: Duration,
    job_timeout: Duration,
    shutdown_timeout: Duration,
    inflight: AtomicUsize,
}

impl ImputeService {
    /// Builds the service and spawns its dispatcher, which takes ownership
    /// of `engine`. Must be called from within a Tokio runtime.
    pub fn new<E: InferenceEngine>(
        config: &ServerConfig,
        engine: E,
        raster: Arc<dyn RasterProvider>,
    ) -> Self {
        let encoder = GeohashEncoder::new(config.geohashes.iter().cloned());
        let pool = DispatchPool::spawn(
            engine,
            config.max_batch_size,
            config.thread_count,
            config.shutdown_timeout,
        );

        Self {
            inner: Arc::new(Inner {
                encoder,
                raster,
                pool,
                read_timeout: config.read_timeout,
                job_timeout: config.job_timeout,
                shutdown_timeout: config.shutdown_timeout,
                inflight: AtomicUsize::new(0),
            }),
        }
    }

    /// Connections currently being served.
    pub fn connections_inflight(&self) -> usize {
        self.inner.inflight.load(Ordering::Acquire)
    }

    /// Serves one connection: a single request batch, a single response,
    /// then the write side is shut down.
    #[tracing::instrument(name = "connection", skip_all, fields(%peer))]
    pub async fn handle_connection<S>(&self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let start = Instant::now();
        let _inflight = InflightGuard::enter(&self.inner.inflight);
        let mut framed = Framed::new(stream, ServerCodec::default());

        let response = match timeout(self.inner.read_timeout, framed.next()).await {
            Ok(Some(Ok(batch))) => self.process(batch).await,
            Ok(Some(Err(e))) => {
                increment_protocol_errors();
                increment_failed_responses();
                tracing::warn!("Rejecting malformed request: {e}");
                Response::Failure(e.to_string())
            }
            Ok(None) => {
                tracing::debug!("Peer closed before sending a request");
                return;
            }
            Err(_) => {
                let e = Error::ReadTimeout {
                    waited_ms: millis(self.inner.read_timeout),
                };
                increment_failed_responses();
                tracing::warn!("Request not received in time: {e}");
                Response::Failure(e.to_string())
            }
        };

        if let Err(e) = reply(&mut framed, response).await {
            tracing::warn!("Failed to write response: {e}");
        }

        record_connection_duration(start.elapsed().as_secs_f64() * 1000.0);
    }

    /// Computes the response for a decoded batch. Never fails: errors become
    /// a [`Response::Failure`].
    pub async fn process(&self, batch: RequestBatch) -> Response {
        increment_request_items(batch.len() as u64);

        match self.impute(&batch).await {
            Ok(rasters) => {
                tracing::debug!(items = rasters.len(), "Batch served");
                Response::Success(rasters)
            }
            Err(e) => {
                increment_failed_responses();
                tracing::warn!("Request failed: {e}");
                Response::Failure(e.to_string())
            }
        }
    }

    async fn impute(&self, batch: &RequestBatch) -> Result<Vec<ImputedRaster>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let jobs = batch
            .requests
            .iter()
            .enumerate()
            .map(|(item, request)| {
                Ok(Job {
                    item,
                    input: self.engine_input(request)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut lane = self.inner.pool.submit(jobs).await?;
        let images = timeout(self.inner.job_timeout, lane.collect())
            .await
            .map_err(|_| Error::JobTimeout {
                waited_ms: millis(self.inner.job_timeout),
            })??;

        assemble(&self.inner.raster, &batch.requests, images).await
    }

    fn engine_input(&self, request: &Request) -> Result<EngineInput> {
        if request.source_image_paths.is_empty() {
            return Err(Error::InvalidRequest {
                reason: format!("request for '{}' has no source images", request.geohash),
            });
        }

        Ok(EngineInput {
            geohash_code: self.inner.encoder.encode(&request.geohash)?,
            timestamp: request.timestamp,
            source_image_paths: request.source_image_paths.clone(),
            reference_image_path: request.reference_image_path.clone(),
        })
    }

    /// Waits for open connections to finish, then stops the dispatcher.
    ///
    /// Call once the listener has stopped accepting.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(
            "Draining in-flight connections ({} active)",
            self.connections_inflight()
        );

        let drained = timeout(self.inner.shutdown_timeout, async {
            while self.connections_inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight connections drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} connections still active)",
                self.connections_inflight()
            ),
        }

        self.inner.pool.shutdown().await
    }
}

/// Writes `response`, falling back to a failure response if it cannot be
/// encoded, then shuts down the write side.
async fn reply<S>(framed: &mut Framed<S, ServerCodec>, response: Response) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.send(response).await {
        Ok(()) => {}
        Err(Error::Io(e)) => return Err(Error::Io(e)),
        Err(e) => {
            // The encoder rolls its buffer back on failure, so nothing of the
            // rejected response reaches the socket.
            increment_failed_responses();
            tracing::warn!("Response could not be encoded: {e}");
            framed.send(Response::Failure(e.to_string())).await?;
        }
    }
    framed.close().await
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

struct InflightGuard<'a>(&'a AtomicUsize);

impl<'a> InflightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        increment_connections_inflight();
        Self(counter)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        decrement_connections_inflight();
    }
}
