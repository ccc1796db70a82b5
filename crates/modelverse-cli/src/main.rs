use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use modelverse_contracts::events::EventWriter;
use modelverse_contracts::jobs::{VideoRequest, DEFAULT_VIDEO_DURATION_S};
use modelverse_contracts::models::{
    ModelRegistry, ModelSpec, FLUX_DEV, FLUX_KONTEXT_MAX, FLUX_KONTEXT_MAX_MULTI, FLUX_KONTEXT_PRO,
    FLUX_KONTEXT_PRO_MULTI, FLUX_KONTEXT_PRO_T2I, STEP1X_EDIT, WAN_I2V, WAN_T2V,
};
use modelverse_contracts::requests::{
    FluxDev, FluxKontext, FluxKontextT2I, ImageRequest, KontextTier, Step1xEdit, RANDOM_SEED,
};
use modelverse_contracts::runs::receipts::{write_receipt, ArtifactRecord, Receipt};
use modelverse_engine::artifacts::{artifact_file_name, image_reference, save_artifact, sha256_hex};
use modelverse_engine::{
    AsyncJobClient, ClientConfig, Credential, HttpTransport, ImageClient, PollPolicy, Transport,
};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

const VIDEO_RESOLUTIONS: [&str; 2] = ["720P", "480P"];
const VIDEO_SIZES: [&str; 4] = ["1280*720", "720*1280", "832*480", "480*832"];
const MAX_SEED: i64 = 2_147_483_647;

#[derive(Debug, Parser)]
#[command(name = "modelverse-rs", version, about = "Modelverse image and video generation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a video through an async task (submit, poll, download).
    Video(VideoArgs),
    /// Generate or edit images with a one-shot request.
    Image(ImageArgs),
    /// List known models.
    Models,
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Falls back to MODELVERSE_API_KEY.
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "Modelverse")]
    prefix: String,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct VideoArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, default_value = "wan-t2v")]
    model: String,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    negative_prompt: Option<String>,
    /// Image path or URL; required for image-to-video.
    #[arg(long)]
    first_frame: Option<String>,
    #[arg(long)]
    last_frame: Option<String>,
    #[arg(long, default_value = "720P")]
    resolution: String,
    /// Text-to-video only.
    #[arg(long, default_value = "1280*720")]
    size: String,
    #[arg(long, default_value_t = 0)]
    seed: i64,
    #[arg(long, default_value_t = DEFAULT_VIDEO_DURATION_S)]
    duration: u32,
    /// Seconds between status checks.
    #[arg(long, default_value_t = 5.0)]
    poll_interval: f64,
    /// Seconds to wait for the task before giving up.
    #[arg(long, default_value_t = 300.0)]
    max_wait: f64,
    #[arg(long, default_value_t = 3)]
    retries: u32,
}

#[derive(Debug, Args)]
struct ImageArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, default_value = "flux-dev")]
    model: String,
    #[arg(long)]
    prompt: String,
    /// Input/reference image path or URL; repeat for multi-image models.
    #[arg(long = "image")]
    images: Vec<String>,
    #[arg(long)]
    negative_prompt: Option<String>,
    #[arg(long, default_value_t = 1024)]
    width: u32,
    #[arg(long, default_value_t = 1024)]
    height: u32,
    #[arg(long, default_value_t = 0.8)]
    strength: f64,
    #[arg(long)]
    guidance_scale: Option<f64>,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long, default_value_t = RANDOM_SEED, allow_negative_numbers = true)]
    seed: i64,
    #[arg(long, default_value_t = 1)]
    num_images: u32,
    #[arg(long, default_value_t = 1)]
    requests: u32,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: String,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("modelverse-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Video(args) => run_video(args),
        Command::Image(args) => run_image(args),
        Command::Models => {
            print_models(&ModelRegistry::default());
            Ok(0)
        }
    }
}

struct Session {
    transport: Arc<dyn Transport>,
    events: EventWriter,
}

fn open_session(common: &CommonArgs) -> Result<Session> {
    let credential = Credential::resolve(common.api_key.as_deref())?;
    let transport = HttpTransport::new(ClientConfig::from_env(), credential)
        .context("failed to set up HTTP client")?;
    std::fs::create_dir_all(&common.out)
        .with_context(|| format!("failed creating {}", common.out.display()))?;
    let events_path = common
        .events
        .clone()
        .unwrap_or_else(|| common.out.join("events.jsonl"));
    let events = EventWriter::new(events_path, uuid::Uuid::new_v4().to_string());
    info!(
        run_id = events.run_id(),
        events = %events.path().display(),
        "run started"
    );
    Ok(Session {
        transport: Arc::new(transport),
        events,
    })
}

fn run_video(args: VideoArgs) -> Result<i32> {
    let registry = ModelRegistry::default();
    let model = registry
        .ensure(&args.model, "video")
        .map_err(anyhow::Error::msg)?;
    let request = build_video_request(&model, &args)?;
    let session = open_session(&args.common)?;

    let policy = PollPolicy::new(
        seconds(args.poll_interval, "--poll-interval")?,
        seconds(args.max_wait, "--max-wait")?,
    )
    .with_transient_retries(args.retries);
    let client = AsyncJobClient::new(session.transport.clone()).with_events(session.events.clone());

    let request_snapshot = serde_json::to_value(&request)?;
    let submission = request.into_submission();
    let provider_request = submission.payload();
    info!(model = %model.name, "submitting video task");
    let completed = client.run(submission, &policy)?;
    let bytes = client.download(&completed.result_url)?;

    let file_name = artifact_file_name(&args.common.prefix, None, "mp4");
    let path = save_artifact(&args.common.out, &file_name, &bytes)?;

    let mut receipt = Receipt::new(
        "video",
        model.name.clone(),
        Some(completed.task_id.clone()),
        &request_snapshot,
        &provider_request,
        &json!({
            "output": {
                "task_id": completed.task_id,
                "task_status": "Success",
                "urls": [completed.result_url],
            },
        }),
    );
    receipt.artifacts.push(ArtifactRecord {
        path: path.clone(),
        source_url: completed.result_url.clone(),
        bytes: bytes.len() as u64,
        sha256: sha256_hex(&bytes),
        width: None,
        height: None,
    });
    receipt
        .result_metadata
        .insert("polls".to_string(), Value::from(completed.polls));
    receipt.result_metadata.insert(
        "waited_s".to_string(),
        Value::from(completed.waited.as_secs_f64()),
    );
    write_receipt(&args.common.out, &receipt)?;

    println!("{}", path.display());
    Ok(0)
}

fn build_video_request(model: &ModelSpec, args: &VideoArgs) -> Result<VideoRequest> {
    if args.prompt.trim().is_empty() {
        bail!("--prompt is required");
    }
    if !VIDEO_RESOLUTIONS.contains(&args.resolution.as_str()) {
        bail!(
            "--resolution must be one of {} (got {})",
            VIDEO_RESOLUTIONS.join(", "),
            args.resolution
        );
    }
    if !(0..=MAX_SEED).contains(&args.seed) {
        bail!("--seed must be between 0 and {MAX_SEED}");
    }

    let mut request = VideoRequest::new(model.name.clone(), args.prompt.clone());
    request.negative_prompt = args.negative_prompt.clone();
    request.resolution = args.resolution.clone();
    request.seed = args.seed;
    request.duration = args.duration;

    match model.name.as_str() {
        WAN_I2V => {
            let Some(first_frame) = args.first_frame.as_deref() else {
                bail!("{WAN_I2V} needs --first-frame (image path or URL)");
            };
            request.first_frame = Some(image_reference(first_frame)?);
            request.last_frame = args
                .last_frame
                .as_deref()
                .map(image_reference)
                .transpose()?;
        }
        WAN_T2V => {
            if !VIDEO_SIZES.contains(&args.size.as_str()) {
                bail!(
                    "--size must be one of {} (got {})",
                    VIDEO_SIZES.join(", "),
                    args.size
                );
            }
            request.size = Some(args.size.clone());
        }
        other => bail!("no video request builder for {other}"),
    }
    Ok(request)
}

fn run_image(args: ImageArgs) -> Result<i32> {
    let registry = ModelRegistry::default();
    let model = registry
        .ensure(&args.model, "image")
        .map_err(anyhow::Error::msg)?;
    if args.requests == 0 || args.requests > 10 {
        bail!("--requests must be between 1 and 10");
    }
    let images = args
        .images
        .iter()
        .map(|raw| image_reference(raw))
        .collect::<Result<Vec<String>>>()?;
    let request = build_image_request(&model, &args, images)?;
    let session = open_session(&args.common)?;
    let client = ImageClient::new(session.transport.clone()).with_events(session.events.clone());

    let results = client.generate_batch(&request, args.requests);
    let mut urls = Vec::new();
    let mut warnings = Vec::new();
    for (slot, result) in results.into_iter().enumerate() {
        match result {
            Ok(slot_urls) if slot_urls.is_empty() => {
                warnings.push(format!("request {slot} returned no image URLs"));
            }
            Ok(slot_urls) => urls.extend(slot_urls),
            Err(err) => warnings.push(format!("request {slot} failed: {err}")),
        }
    }
    info!(
        succeeded = args.requests as usize - warnings.len(),
        requested = args.requests,
        "image requests made"
    );
    if urls.is_empty() {
        bail!("no images were generated: {}", warnings.join("; "));
    }

    let fetched = client.fetch_images(&urls);
    warnings.extend(fetched.warnings.iter().cloned());
    let mut receipt = Receipt::new(
        "image",
        request.model(),
        None,
        &json!({"prompt": request.prompt(), "requests": args.requests, "model": request.model()}),
        &Value::Object(request.build_payload().map_err(anyhow::Error::msg)?),
        &json!({"data": urls.iter().map(|url| json!({"url": url})).collect::<Vec<Value>>()}),
    );
    for (index, image) in fetched.images.iter().enumerate() {
        let file_name = artifact_file_name(&args.common.prefix, Some(index), &image.probe.extension);
        let path = save_artifact(&args.common.out, &file_name, &image.bytes)?;
        println!("{}", path.display());
        receipt.artifacts.push(ArtifactRecord {
            path,
            source_url: image.url.clone(),
            bytes: image.bytes.len() as u64,
            sha256: sha256_hex(&image.bytes),
            width: Some(image.probe.width),
            height: Some(image.probe.height),
        });
    }
    for warning in &warnings {
        eprintln!("warning: {warning}");
    }
    receipt.warnings = warnings;
    write_receipt(&args.common.out, &receipt)?;

    if fetched.images.is_empty() {
        bail!("none of the {} generated images could be loaded", urls.len());
    }
    Ok(0)
}

fn build_image_request(model: &ModelSpec, args: &ImageArgs, images: Vec<String>) -> Result<ImageRequest> {
    let request = match model.name.as_str() {
        FLUX_DEV => {
            if images.len() > 1 {
                bail!("{FLUX_DEV} takes at most one reference image");
            }
            let mut request = FluxDev::new(args.prompt.clone());
            request.image = images.into_iter().next();
            request.width = args.width;
            request.height = args.height;
            request.strength = args.strength;
            request.num_images = args.num_images;
            request.seed = args.seed;
            if let Some(guidance) = args.guidance_scale {
                request.guidance_scale = guidance;
            }
            if let Some(steps) = args.steps {
                request.num_inference_steps = steps;
            }
            ImageRequest::FluxDev(request)
        }
        FLUX_KONTEXT_PRO | FLUX_KONTEXT_PRO_MULTI | FLUX_KONTEXT_MAX | FLUX_KONTEXT_MAX_MULTI => {
            let tier = if model.name.starts_with(FLUX_KONTEXT_MAX) {
                KontextTier::Max
            } else {
                KontextTier::Pro
            };
            let mut request = FluxKontext::new(tier, args.prompt.clone(), images);
            request.seed = args.seed;
            if let Some(guidance) = args.guidance_scale {
                request.guidance_scale = guidance;
            }
            ImageRequest::FluxKontext(request)
        }
        FLUX_KONTEXT_PRO_T2I => {
            let mut request = FluxKontextT2I::new(args.prompt.clone());
            request.aspect_ratio = args.aspect_ratio.clone();
            request.num_images = args.num_images;
            request.seed = args.seed;
            if let Some(guidance) = args.guidance_scale {
                request.guidance_scale = guidance;
            }
            ImageRequest::FluxKontextT2I(request)
        }
        STEP1X_EDIT => {
            let [image] = <[String; 1]>::try_from(images)
                .map_err(|_| anyhow::anyhow!("{STEP1X_EDIT} needs exactly one --image"))?;
            let mut request = Step1xEdit::new(args.prompt.clone(), image);
            request.negative_prompt = args.negative_prompt.clone().unwrap_or_default();
            request.seed = args.seed;
            if let Some(guidance) = args.guidance_scale {
                request.guidance_scale = guidance;
            }
            if let Some(steps) = args.steps {
                request.num_inference_steps = steps;
            }
            ImageRequest::Step1xEdit(request)
        }
        other => bail!("no image request builder for {other}"),
    };
    request.build_payload().map_err(anyhow::Error::msg)?;
    Ok(request)
}

fn print_models(registry: &ModelRegistry) {
    for model in registry.list() {
        let mode = if model.is_async_task() { "async" } else { "sync" };
        println!(
            "{:<20} {:<50} {:<6} {}",
            model.alias.as_deref().unwrap_or("-"),
            model.name,
            mode,
            model.capabilities.join(",")
        );
    }
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{flag} must be a positive number of seconds");
    }
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{flag} is out of range ({value} seconds)"))
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use modelverse_contracts::models::ModelRegistry;
    use modelverse_contracts::requests::ImageRequest;

    use super::{build_image_request, build_video_request, seconds, Cli, Command};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn video_defaults_follow_text_to_video() {
        let Command::Video(args) = parse(&["modelverse-rs", "video", "--prompt", "flower", "--out", "/tmp/o"]).command
        else {
            panic!("expected video command");
        };
        let model = ModelRegistry::default().ensure(&args.model, "video").unwrap();
        let submission = build_video_request(&model, &args).unwrap().into_submission();
        assert_eq!(submission.model, "Wan-AI/Wan2.2-T2V");
        assert_eq!(submission.parameters["size"], "1280*720");
        assert_eq!(submission.parameters["duration"], 5);
        assert_eq!(args.poll_interval, 5.0);
        assert_eq!(args.max_wait, 300.0);
    }

    #[test]
    fn image_to_video_requires_a_first_frame() {
        let Command::Video(args) = parse(&[
            "modelverse-rs", "video", "--model", "wan-i2v", "--prompt", "move", "--out", "/tmp/o",
        ])
        .command
        else {
            panic!("expected video command");
        };
        let model = ModelRegistry::default().ensure(&args.model, "video").unwrap();
        let err = build_video_request(&model, &args).unwrap_err();
        assert!(err.to_string().contains("--first-frame"));
    }

    #[test]
    fn image_to_video_accepts_frame_urls() {
        let Command::Video(args) = parse(&[
            "modelverse-rs", "video", "--model", "wan-i2v", "--prompt", "move", "--out", "/tmp/o",
            "--first-frame", "https://x/first.png",
        ])
        .command
        else {
            panic!("expected video command");
        };
        let model = ModelRegistry::default().ensure(&args.model, "video").unwrap();
        let submission = build_video_request(&model, &args).unwrap().into_submission();
        assert_eq!(submission.input["first_frame_url"], "https://x/first.png");
        assert!(!submission.parameters.contains_key("size"));
    }

    #[test]
    fn video_rejects_unsupported_size() {
        let Command::Video(args) = parse(&[
            "modelverse-rs", "video", "--prompt", "flower", "--out", "/tmp/o", "--size", "100*100",
        ])
        .command
        else {
            panic!("expected video command");
        };
        let model = ModelRegistry::default().ensure(&args.model, "video").unwrap();
        assert!(build_video_request(&model, &args).is_err());
    }

    #[test]
    fn image_model_aliases_pick_builders() {
        let Command::Image(args) = parse(&[
            "modelverse-rs", "image", "--model", "kontext-max", "--prompt", "red hat", "--out", "/tmp/o",
            "--seed", "-1",
        ])
        .command
        else {
            panic!("expected image command");
        };
        let model = ModelRegistry::default().ensure(&args.model, "image").unwrap();
        let request = build_image_request(
            &model,
            &args,
            vec!["https://x/a.png".to_string(), "https://x/b.png".to_string()],
        )
        .unwrap();
        assert!(matches!(request, ImageRequest::FluxKontext(_)));
        assert_eq!(request.model(), "black-forest-labs/flux-kontext-max/multi");
        assert_eq!(request.seed(), -1);
    }

    #[test]
    fn step1x_needs_exactly_one_image() {
        let Command::Image(args) = parse(&[
            "modelverse-rs", "image", "--model", "step1x-edit", "--prompt", "remove hat", "--out", "/tmp/o",
        ])
        .command
        else {
            panic!("expected image command");
        };
        let model = ModelRegistry::default().ensure(&args.model, "image").unwrap();
        assert!(build_image_request(&model, &args, Vec::new()).is_err());
        assert!(build_image_request(&model, &args, vec!["https://x/a.png".to_string()]).is_ok());
    }

    #[test]
    fn seconds_must_be_positive() {
        assert!(seconds(0.0, "--max-wait").is_err());
        assert!(seconds(f64::NAN, "--max-wait").is_err());
        assert!(seconds(1e30, "--max-wait").is_err());
        assert_eq!(seconds(1.5, "--max-wait").unwrap().as_millis(), 1500);
    }
}
