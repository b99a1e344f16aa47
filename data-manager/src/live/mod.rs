//! Live streaming pipeline
//!
//! Closed klines from the stream client are appended to an in-memory buffer.
//! A flush task drains it every `flush_interval_seconds`, or as soon as it
//! holds `max_size_records` candles, and upserts the batch. Shutdown stops the
//! stream and flushes whatever is left.

mod buffer;
mod flusher;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::archive::ColumnarArchive;
use crate::checkpoint::DeadLetterStore;
use crate::config::{LiveConfig, Settings};
use crate::error::PipelineResult;
use crate::storage::TimeSeriesStore;
use crate::stream::{EventKind, StreamClient, StreamError, StreamEvent, StreamStats};

pub use buffer::{LiveBuffer, PendingBatch};
pub use flusher::{FlushStats, Flusher};

#[derive(Debug, Clone, Copy, Default)]
pub struct LiveReport {
    pub stream: StreamStats,
    pub flush: FlushStats,
}

pub struct LivePipeline {
    config: LiveConfig,
    client: StreamClient,
    buffer: Arc<LiveBuffer>,
    flusher: Flusher,
}

impl LivePipeline {
    pub fn new(config: LiveConfig, client: StreamClient, flusher: Flusher) -> Self {
        let buffer = Arc::new(LiveBuffer::new(config.buffer.max_size_records));
        Self {
            config,
            client,
            buffer,
            flusher,
        }
    }

    /// Wire the pipeline from settings. `mirror_to_archive` also writes every
    /// flushed batch to the parquet archive.
    pub fn from_settings(
        config: LiveConfig,
        store: Arc<TimeSeriesStore>,
        settings: &Settings,
        mirror_to_archive: bool,
    ) -> Self {
        let mut flusher = Flusher::new(
            store,
            DeadLetterStore::new(&settings.storage.dead_letter_dir),
            settings.live.flush_policy(),
        );
        if mirror_to_archive {
            flusher = flusher.with_archive(ColumnarArchive::new(&settings.storage.archive_root));
        }
        Self::new(config, StreamClient::from_settings(settings), flusher)
    }

    pub fn client(&self) -> &StreamClient {
        &self.client
    }

    pub fn buffer(&self) -> &Arc<LiveBuffer> {
        &self.buffer
    }

    /// Subscribe every enabled stream, then run until `shutdown` fires or the
    /// stream client gives up.
    pub async fn run(mut self, shutdown: &broadcast::Sender<()>) -> PipelineResult<LiveReport> {
        let buffer = self.buffer.clone();
        self.client.on(EventKind::Kline, move |event| {
            if let StreamEvent::Kline(candle) = event {
                debug!(symbol = %candle.symbol, timeframe = %candle.timeframe, "closed candle");
                buffer.push(candle.clone());
            }
        });
        self.client.on(EventKind::Status, |event| {
            if let StreamEvent::Status(state) = event {
                info!(%state, "stream state");
            }
        });

        let mut subscribed = 0;
        for stream in self.config.enabled_streams() {
            info!(symbol = %stream.symbol, timeframes = ?stream.timeframes, "subscribing");
            self.client
                .subscribe_klines(&stream.symbol, &stream.timeframes)
                .await?;
            subscribed += stream.timeframes.len();
        }
        if subscribed == 0 {
            warn!("no enabled streams configured");
        }

        let client = self.client.clone();
        let stream_shutdown = shutdown.subscribe();
        let mut stream_task = tokio::spawn(async move { client.run(stream_shutdown).await });
        let mut stream_done = false;

        let every = self.config.buffer.flush_interval();
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = shutdown.subscribe();
        let mut outcome: PipelineResult<()> = Ok(());

        info!(
            channels = subscribed,
            max_size = self.config.buffer.max_size_records,
            interval_secs = every.as_secs(),
            "live pipeline started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flusher.flush(&self.buffer).await;
                    let stats = self.client.stats();
                    debug!(
                        received = stats.messages_received,
                        closed_klines = stats.closed_klines,
                        malformed = stats.malformed_dropped,
                        buffered = self.buffer.len(),
                        held = self.flusher.held(),
                        "pipeline health"
                    );
                }
                _ = self.buffer.filled() => {
                    debug!(buffered = self.buffer.len(), "buffer full, flushing early");
                    self.flusher.flush(&self.buffer).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested, flushing remaining candles");
                    break;
                }
                joined = &mut stream_task, if !stream_done => {
                    stream_done = true;
                    outcome = match joined {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e.into()),
                        Err(e) => {
                            error!(error = %e, "stream task aborted");
                            Err(StreamError::Closed.into())
                        }
                    };
                    break;
                }
            }
        }

        if !stream_done {
            match stream_task.await {
                Ok(Err(e)) => warn!(error = %e, "stream stopped with error"),
                Err(e) => warn!(error = %e, "stream task aborted"),
                Ok(Ok(())) => {}
            }
        }
        self.flusher.flush_final(&self.buffer).await;

        let report = LiveReport {
            stream: self.client.stats(),
            flush: self.flusher.stats(),
        };
        match &outcome {
            Ok(()) => info!(
                candles = report.flush.candles_inserted,
                batches = report.flush.batches_flushed,
                dead_lettered = report.flush.batches_dead_lettered,
                reconnects = report.stream.reconnects,
                "live pipeline stopped"
            ),
            Err(e) => error!(error = %e, "live pipeline failed"),
        }
        outcome.map(|()| report)
    }
}

