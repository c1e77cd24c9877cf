use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use image::{ImageFormat, Rgb, RgbImage};
use tracing::{info, warn};

use mediagate_core::{AttachmentId, ContentHash, ConversationId, GuardConfig};
use mediagate_gateway::testing::{RecordingPipeline, TokioClock};
use mediagate_gateway::{
    GateDecision, GatewayError, MediaGuardBuilder, MetricsSnapshot, Observation,
};

use crate::backends::{BlocklistKind, LedgerKind};

/// Inputs to [`run_scenario`].
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub config: GuardConfig,
    pub ledger: LedgerKind,
    pub blocklist: BlocklistKind,
}

impl SimulationOptions {
    /// Memory backends and a schedule compressed to seconds.
    pub fn quick() -> Self {
        let mut config = GuardConfig::default();
        config.retry.initial_delay_secs = 1;
        config.retry.max_delay_secs = 8;
        Self::with_config(config)
    }

    /// Memory backends with the given configuration.
    pub fn with_config(config: GuardConfig) -> Self {
        Self {
            config,
            ledger: LedgerKind::default(),
            blocklist: BlocklistKind::default(),
        }
    }
}

/// What happened during a scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// Decision for the download attempted while the content was reported.
    pub decision: GateDecision,
    /// Whether the deferred download was released before the deadline.
    pub released: bool,
    /// Similar prior sightings found for the second copy of the image.
    pub similar_sightings: usize,
    /// Unblocked sightings removed by the final prune.
    pub pruned: u64,
    pub metrics: MetricsSnapshot,
}

/// A deterministic PNG for the scenario.
pub fn sample_image() -> Result<Vec<u8>, image::ImageError> {
    let img = RgbImage::from_fn(96, 64, |x, y| {
        let r = u8::try_from((x * 255) / 96).unwrap_or(u8::MAX);
        let g = u8::try_from((y * 255) / 64).unwrap_or(u8::MAX);
        Rgb([r, g, 128])
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Run the deferred-download lifecycle once.
pub async fn run_scenario(options: SimulationOptions) -> Result<ScenarioReport, GatewayError> {
    let store = options.ledger.connect().await?;
    let backend = options.blocklist.connect().await?;
    let pipeline = Arc::new(RecordingPipeline::new());
    let clock = Arc::new(TokioClock::new(Utc::now()));

    // Wait long enough for the first re-check plus one backed-off retry.
    let deadline = Duration::from_secs(
        options
            .config
            .retry
            .initial_delay_secs
            .saturating_mul(3)
            .saturating_add(5),
    );

    let guard = MediaGuardBuilder::new(options.config)
        .ledger(store)
        .blocklist(backend)
        .pipeline(pipeline.clone())
        .clock(clock)
        .build()?;
    guard.start();

    let conversation = ConversationId::new("simulation");
    let image = sample_image()
        .map_err(|e| GatewayError::Configuration(format!("sample image: {e}")))?;
    let attachment = AttachmentId::new(format!("attachment-{}", Utc::now().timestamp_millis()));
    pipeline.insert_file(&attachment, image.clone());

    guard
        .observe_incoming(&conversation, None, Some("first.png"), &image)
        .await?;
    let outcome = guard.report_content(&image).await?;
    info!(?outcome, "image reported to the shared blocklist");

    let decision = guard.validate_download(&attachment, None).await;
    info!(?decision, attachment_id = %attachment, "download checked");

    let similar_sightings = match guard
        .observe_incoming(&conversation, Some(&attachment), Some("second.png"), &image)
        .await?
    {
        Observation::Recorded {
            similar,
            locally_blocked,
            ..
        } => {
            info!(similar = similar.len(), locally_blocked, "second copy observed");
            similar.len()
        }
        Observation::Unhashable { reason } => {
            warn!(%reason, "second copy could not be fingerprinted");
            0
        }
    };

    guard.clear_content(&image).await?;
    info!(hash = %ContentHash::of(&image), "report withdrawn, waiting for release");

    let released = pipeline.wait_for_ready(1, deadline).await;
    if released {
        info!(attachment_id = %attachment, "deferred download released");
    } else {
        warn!(attachment_id = %attachment, ?deadline, "deferred download not released in time");
    }

    let pruned = guard.prune_expired().await?;
    guard.shutdown().await;

    Ok(ScenarioReport {
        decision,
        released,
        similar_sightings,
        pruned,
        metrics: guard.metrics(),
    })
}
