use std::sync::Arc;

use modelverse_contracts::events::EventWriter;
use modelverse_contracts::requests::{normalize_seed, ImageRequest};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::artifacts::{probe_image, ImageProbe};
use crate::error::GenerateError;
use crate::transport::Transport;

/// Client for the synchronous `/v1/images/generations` endpoint.
#[derive(Clone)]
pub struct ImageClient {
    transport: Arc<dyn Transport>,
    events: Option<EventWriter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub url: String,
    pub bytes: Vec<u8>,
    pub probe: ImageProbe,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedImages {
    pub images: Vec<FetchedImage>,
    pub warnings: Vec<String>,
}

impl ImageClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    /// One request; returns the image URLs the service produced.
    pub fn generate(&self, request: &ImageRequest) -> Result<Vec<String>, GenerateError> {
        let mut payload = request.build_payload().map_err(GenerateError::InvalidRequest)?;
        if let Some(seed) = payload.get("seed").and_then(Value::as_i64) {
            payload.insert("seed".to_string(), Value::from(normalize_seed(seed)));
        }
        let raw = self.transport.generate_images(&Value::Object(payload))?;
        let urls = image_urls_from_response(raw)?;
        info!(model = request.model(), count = urls.len(), "images generated");
        Ok(urls)
    }

    /// Sends `num_requests` independent requests at once, slot `i` with seed offset `i`.
    /// Results come back in slot order; one failed slot never affects another.
    pub fn generate_batch(
        &self,
        request: &ImageRequest,
        num_requests: u32,
    ) -> Vec<Result<Vec<String>, GenerateError>> {
        info!(model = request.model(), num_requests, "sending image requests concurrently");
        self.emit(
            "images_requested",
            json!({ "model": request.model(), "num_requests": num_requests }),
        );
        let results: Vec<Result<Vec<String>, GenerateError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..num_requests)
                .map(|slot| {
                    let slot_request = request.for_slot(slot);
                    scope.spawn(move || self.generate(&slot_request))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(GenerateError::InvalidRequest("request worker panicked".to_string()))
                    })
                })
                .collect()
        });
        let succeeded = results.iter().filter(|result| result.is_ok()).count();
        info!(succeeded, num_requests, "image requests finished");
        self.emit(
            "images_received",
            json!({
                "model": request.model(),
                "succeeded": succeeded,
                "num_requests": num_requests,
                "urls": results
                    .iter()
                    .filter_map(|result| result.as_ref().ok())
                    .flatten()
                    .collect::<Vec<&String>>(),
            }),
        );
        results
    }

    /// Downloads and decodes each URL. Unreachable or undecodable images are skipped
    /// and reported in `warnings`.
    pub fn fetch_images(&self, urls: &[String]) -> FetchedImages {
        let mut fetched = FetchedImages::default();
        for url in urls {
            let bytes = match self.transport.fetch(url) {
                Ok(bytes) => bytes,
                Err(err) => {
                    fetched.warnings.push(format!("failed to download {url}: {err}"));
                    continue;
                }
            };
            match probe_image(&bytes) {
                Some(probe) => fetched.images.push(FetchedImage {
                    url: url.clone(),
                    bytes,
                    probe,
                }),
                None => fetched
                    .warnings
                    .push(format!("{url} did not decode as an image")),
            }
        }
        if fetched.images.len() != urls.len() {
            warn!(
                loaded = fetched.images.len(),
                requested = urls.len(),
                "some output images could not be loaded"
            );
        }
        fetched
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(writer) = &self.events else {
            return;
        };
        let payload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = writer.emit(event_type, payload) {
            warn!(event = event_type, error = %err, "failed to append run event");
        }
    }
}

/// Unwraps the `{code, message, data}` envelope when present, then reads `data`
/// as a list of `{url}` objects or bare URL strings.
pub fn image_urls_from_response(raw: Value) -> Result<Vec<String>, GenerateError> {
    let body = match raw.get("code").and_then(Value::as_i64) {
        Some(401) => return Err(GenerateError::Unauthorized),
        Some(200) => raw.get("data").cloned().unwrap_or(Value::Null),
        Some(code) => {
            return Err(GenerateError::Api {
                status: u16::try_from(code).unwrap_or(0),
                message: raw
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string(),
            })
        }
        None => raw,
    };
    let rows = body
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(rows
        .iter()
        .filter_map(|row| match row {
            Value::String(url) => Some(url.as_str()),
            Value::Object(map) => map.get("url").and_then(Value::as_str),
            _ => None,
        })
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect())
}
