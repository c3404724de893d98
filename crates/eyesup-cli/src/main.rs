use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use eyesup_proto::FrameEvent;
use eyesup_vision::{
    Frame, FrameShape, LabelTable, MatchStrategy, Pipeline, ProximityRule, VisionConfig, Worker,
    NUM_CLASSES,
};

#[derive(Debug, Parser)]
#[command(name = "eyesup", version, about = "EyesUp - phone-near-head detection post-processing")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate config, tensor shape and label table.
    Doctor,
    /// Print the label table with class ids.
    Labels,
    /// Run recorded detector output through the pipeline, one JSON line per frame.
    Replay {
        /// Raw little-endian f32 dump, `num_records * 8` values per frame.
        #[arg(long)]
        input: String,
        /// Feed frames through the background worker at `replay.fps`.
        #[arg(long)]
        live: bool,
    },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    model: ModelCfg,
    #[serde(default)]
    pipeline: PipelineCfg,
    #[serde(default)]
    tracking: TrackingCfg,
    #[serde(default)]
    proximity: ProximityRule,
    #[serde(default)]
    replay: ReplayCfg,
}

#[derive(Debug, serde::Deserialize)]
struct ModelCfg {
    tensor_w: u32,
    tensor_h: u32,
    num_records: usize,
    labels_path: String,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct PipelineCfg {
    conf_threshold: f32,
    nms_iou_threshold: f32,
    max_detections: Option<usize>,
}

impl Default for PipelineCfg {
    fn default() -> Self {
        let v = VisionConfig::default();
        Self {
            conf_threshold: v.conf_threshold,
            nms_iou_threshold: v.nms_iou_threshold,
            max_detections: v.max_detections,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct TrackingCfg {
    iou_match_threshold: f32,
    match_strategy: MatchStrategy,
}

impl Default for TrackingCfg {
    fn default() -> Self {
        let v = VisionConfig::default();
        Self { iou_match_threshold: v.iou_match_threshold, match_strategy: v.match_strategy }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct ReplayCfg {
    fps: f32,
}

impl Default for ReplayCfg {
    fn default() -> Self {
        Self { fps: 15.0 }
    }
}

impl Config {
    fn shape(&self) -> FrameShape {
        FrameShape::new(self.model.tensor_w, self.model.tensor_h, self.model.num_records)
    }

    fn vision(&self) -> VisionConfig {
        VisionConfig {
            conf_threshold: self.pipeline.conf_threshold,
            nms_iou_threshold: self.pipeline.nms_iou_threshold,
            max_detections: self.pipeline.max_detections,
            iou_match_threshold: self.tracking.iou_match_threshold,
            match_strategy: self.tracking.match_strategy,
            proximity: self.proximity.clone(),
        }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    parse_config(&s)
}

fn parse_config(s: &str) -> Result<Config> {
    toml::from_str(s).context("parse config toml")
}

#[derive(Debug, serde::Serialize)]
struct FrameLine<'a> {
    ts_unix_ms: i64,
    frame: u64,
    #[serde(flatten)]
    event: &'a FrameEvent,
}

fn emit(frame: u64, event: &FrameEvent) -> Result<()> {
    let line = FrameLine {
        ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
        frame,
        event,
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Labels => labels_cmd(&cfg)?,
        Command::Replay { input, live } => replay(&cfg, &input, live).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    cfg.shape().validate().context("model shape")?;

    let p = &cfg.pipeline;
    anyhow::ensure!(p.conf_threshold > 0.0 && p.conf_threshold < 1.0, "pipeline.conf_threshold should be in (0, 1)");
    anyhow::ensure!(p.nms_iou_threshold > 0.0 && p.nms_iou_threshold <= 1.0, "pipeline.nms_iou_threshold should be in (0, 1]");
    anyhow::ensure!(p.max_detections != Some(0), "pipeline.max_detections must be > 0 when set");
    let t = &cfg.tracking;
    anyhow::ensure!(t.iou_match_threshold >= 0.0 && t.iou_match_threshold < 1.0, "tracking.iou_match_threshold should be in [0, 1)");
    anyhow::ensure!(cfg.replay.fps > 0.0 && cfg.replay.fps.is_finite(), "replay.fps must be a finite value > 0");

    let labels = LabelTable::load(&cfg.model.labels_path)?;
    anyhow::ensure!(
        labels.len() >= NUM_CLASSES,
        "labels: {} has {} names, model emits {} classes",
        cfg.model.labels_path, labels.len(), NUM_CLASSES
    );
    if labels.len() > NUM_CLASSES {
        warn!("labels: {} names beyond the {} model classes are never used", labels.len() - NUM_CLASSES, NUM_CLASSES);
    }
    for class in [&cfg.proximity.subject_class, &cfg.proximity.anchor_class] {
        if !labels.iter().take(NUM_CLASSES).any(|l| l == class.as_str()) {
            warn!("proximity: class {:?} is not among the model's labels, rule never fires", class);
        }
    }

    info!("doctor: OK");
    Ok(())
}

fn labels_cmd(cfg: &Config) -> Result<()> {
    let labels = LabelTable::load(&cfg.model.labels_path)?;
    for (i, name) in labels.iter().enumerate() {
        println!("{}\t{}", i, name);
    }
    Ok(())
}

/// Splits a little-endian f32 dump into frames of `frame_len` values. A short
/// tail is kept as its own frame.
fn read_frames(bytes: &[u8], frame_len: usize) -> Result<Vec<Vec<f32>>> {
    anyhow::ensure!(bytes.len() % 4 == 0, "input length {} is not a whole number of f32 values", bytes.len());
    anyhow::ensure!(frame_len > 0, "frame length is zero");
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(values.chunks(frame_len).map(<[f32]>::to_vec).collect())
}

/// Tick period for `--live` replay, kept between 1ms and 10s.
fn frame_period(fps: f32) -> Duration {
    let secs = if fps > 0.0 { 1.0 / fps } else { 10.0 };
    Duration::from_secs_f32(secs.clamp(0.001, 10.0))
}

async fn replay(cfg: &Config, input: &str, live: bool) -> Result<()> {
    let labels = LabelTable::load(&cfg.model.labels_path)?;
    let shape = cfg.shape();
    let mut pipeline = Pipeline::new(cfg.vision(), labels, shape)?;

    let bytes = tokio::fs::read(input).await.with_context(|| format!("read replay input {}", input))?;
    let frames = read_frames(&bytes, shape.frame_len())?;
    info!("replay: {} frames from {}", frames.len(), input);

    if !live {
        for (seq, raw) in frames.iter().enumerate() {
            let ev = pipeline.process(raw, 0);
            emit(seq as u64, &ev)?;
        }
        return Ok(());
    }

    let (worker, mut events) = Worker::spawn(pipeline)?;
    let printer = tokio::spawn(async move {
        while let Some(res) = events.recv().await {
            if let Err(e) = emit(res.seq, &res.event) {
                warn!("replay: emit failed: {:#}", e);
            }
        }
    });

    let mut tick = tokio::time::interval(frame_period(cfg.replay.fps));
    for (seq, raw) in frames.into_iter().enumerate() {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("replay: interrupted at frame {}", seq);
                break;
            }
        }
        worker.submit(Frame::new(seq as u64, raw, 0))?;
    }

    let pipeline = tokio::task::spawn_blocking(move || worker.shutdown()).await??;
    printer.await?;
    info!("replay: done, {} track ids issued", pipeline.state().next_id());
    Ok(())
}
