#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use chrono::Utc;
use image::{ImageFormat, Rgb, RgbImage};

use mediagate_blocklist::testing::FlakyBackend;
use mediagate_blocklist_memory::MemoryBlocklistBackend;
use mediagate_core::GuardConfig;
use mediagate_gateway::testing::{RecordingPipeline, TokioClock};
use mediagate_gateway::{MediaGuard, MediaGuardBuilder};
use mediagate_ledger::testing::FlakyStore;
use mediagate_ledger_memory::MemoryLedgerStore;

pub struct Harness {
    pub guard: Arc<MediaGuard>,
    pub store: Arc<FlakyStore>,
    pub backend: Arc<FlakyBackend>,
    pub pipeline: Arc<RecordingPipeline>,
    pub clock: Arc<TokioClock>,
}

/// Defaults with jitter off so schedules are exact.
pub fn config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.retry.jitter = 0.0;
    config.blocklist.jitter = 0.0;
    config.blocklist.max_attempts = 2;
    config
}

pub fn harness(config: GuardConfig) -> Harness {
    init_tracing();
    let clock = Arc::new(TokioClock::new(Utc::now()));
    let store = Arc::new(FlakyStore::new(Arc::new(MemoryLedgerStore::new())));
    let backend = Arc::new(FlakyBackend::new(Arc::new(MemoryBlocklistBackend::new())));
    let pipeline = Arc::new(RecordingPipeline::new());

    let guard = MediaGuardBuilder::new(config)
        .ledger(store.clone())
        .blocklist(backend.clone())
        .pipeline(pipeline.clone())
        .clock(clock.clone())
        .build()
        .expect("guard should build");

    Harness {
        guard: Arc::new(guard),
        store,
        backend,
        pipeline,
        clock,
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn encode(img: RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("png encoding");
    buf
}

/// A smooth gradient with a constant blue channel.
pub fn gradient_png(shade: u8) -> Vec<u8> {
    encode(RgbImage::from_fn(64, 64, |x, y| {
        let v = u8::try_from(x * 4).unwrap_or(255);
        let w = u8::try_from(y * 4).unwrap_or(255);
        Rgb([v, w, shade])
    }))
}

pub fn checker_png() -> Vec<u8> {
    encode(RgbImage::from_fn(64, 64, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    }))
}
