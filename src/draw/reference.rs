//! Reference (tracing guide) image layer and its asynchronous loader.
//!
//! Loads run on a worker thread and report back over a channel. Only the host
//! thread touches the layer: it drains completions and applies the one whose
//! generation matches the most recent request. Anything older is dropped, so
//! an in-flight decode never needs real cancellation.

use crate::draw::tools::HostField;
use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use image::imageops::FilterType;
use image::RgbaImage;
use std::borrow::Cow;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// Where the source bitmap lands inside the canvas, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest rect with the source aspect ratio that fits the bounds, anchored
/// top-left.
pub fn fit_rect(source: (u32, u32), bounds: (u32, u32)) -> FitRect {
    let (sw, sh) = source;
    let (bw, bh) = bounds;
    if sw == 0 || sh == 0 || bw == 0 || bh == 0 {
        return FitRect {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        };
    }
    let scale = (bw as f64 / sw as f64).min(bh as f64 / sh as f64);
    FitRect {
        x: 0,
        y: 0,
        width: ((sw as f64 * scale).round() as u32).clamp(1, bw),
        height: ((sh as f64 * scale).round() as u32).clamp(1, bh),
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub url: String,
    source: RgbaImage,
    fitted: RgbaImage,
}

impl ReferenceImage {
    pub fn new(url: String, source: RgbaImage, logical_size: (u32, u32)) -> Self {
        let fitted = fit_image(&source, logical_size);
        Self {
            url,
            source,
            fitted,
        }
    }

    /// The bitmap fitted into `bounds`. The logical-size fit is cached.
    pub fn fitted_for(&self, bounds: (u32, u32)) -> Cow<'_, RgbaImage> {
        let rect = fit_rect(self.source.dimensions(), bounds);
        if self.fitted.dimensions() == (rect.width, rect.height) {
            Cow::Borrowed(&self.fitted)
        } else {
            Cow::Owned(fit_image(&self.source, bounds))
        }
    }
}

fn fit_image(source: &RgbaImage, bounds: (u32, u32)) -> RgbaImage {
    let rect = fit_rect(source.dimensions(), bounds);
    if rect.width == 0 || rect.height == 0 {
        return RgbaImage::new(0, 0);
    }
    if source.dimensions() == (rect.width, rect.height) {
        return source.clone();
    }
    image::imageops::resize(source, rect.width, rect.height, FilterType::Triangle)
}

/// The background layer. Hiding it keeps the decoded bitmap so showing it
/// again never refetches.
#[derive(Debug)]
pub struct ReferenceLayer {
    source_url: Option<String>,
    image: Option<ReferenceImage>,
    opacity: f32,
    visible: bool,
    host_visible: Option<HostField<bool>>,
    revision: u64,
}

impl ReferenceLayer {
    pub fn new(
        source_url: Option<String>,
        opacity: f32,
        visible: bool,
        host_visible: Option<HostField<bool>>,
    ) -> Self {
        Self {
            source_url,
            image: None,
            opacity: opacity.clamp(0.0, 1.0),
            visible,
            host_visible,
            revision: 0,
        }
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn set_source_url(&mut self, url: Option<String>) {
        self.source_url = url;
    }

    pub fn image(&self) -> Option<&ReferenceImage> {
        self.image.as_ref()
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Effective visibility; a host-controlled flag is read fresh every call.
    pub fn visible(&self) -> bool {
        match &self.host_visible {
            Some(field) => field.get(),
            None => self.visible,
        }
    }

    /// Flips the internal flag. Returns the new value, or `None` when the host
    /// owns visibility.
    pub fn toggle(&mut self) -> Option<bool> {
        if self.host_visible.is_some() {
            return None;
        }
        self.visible = !self.visible;
        Some(self.visible)
    }

    /// Bumped whenever the bitmap changes, so cached frames can tell.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn apply(&mut self, image: ReferenceImage) {
        self.image = Some(image);
        self.revision += 1;
    }

    /// The fitted bitmap when the layer currently contributes pixels.
    pub fn shown_image(&self) -> Option<&ReferenceImage> {
        if self.visible() {
            self.image.as_ref()
        } else {
            None
        }
    }

    pub fn needs_load(&self) -> bool {
        match (&self.source_url, &self.image) {
            (Some(_), None) => self.visible(),
            (Some(url), Some(image)) => self.visible() && image.url != *url,
            (None, _) => false,
        }
    }
}

/// Fetches the raw bytes behind a reference URL. Runs on a worker thread.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Handles `data:` URIs, local paths / `file://` URLs and `http(s)://` URLs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFetcher;

impl ImageFetcher for DefaultFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(rest) = url.strip_prefix("data:") {
            return decode_data_uri(rest);
        }
        match url::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                let response = reqwest::blocking::get(parsed.as_str())
                    .with_context(|| format!("request {url}"))?
                    .error_for_status()
                    .with_context(|| format!("fetch {url}"))?;
                let bytes = response
                    .bytes()
                    .with_context(|| format!("read response body of {url}"))?;
                Ok(bytes.to_vec())
            }
            Ok(parsed) if parsed.scheme() == "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| anyhow!("file URL has no local path: {url}"))?;
                std::fs::read(&path).with_context(|| format!("read {}", path.display()))
            }
            // Single-letter schemes are Windows drive letters.
            Ok(parsed) if parsed.scheme().len() > 1 => {
                bail!("unsupported reference URL scheme {:?}", parsed.scheme())
            }
            _ => std::fs::read(url).with_context(|| format!("read {url}")),
        }
    }
}

fn decode_data_uri(rest: &str) -> Result<Vec<u8>> {
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("data URI has no payload separator"))?;
    if !meta.ends_with(";base64") {
        bail!("only base64 data URIs are supported");
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("decode base64 data URI payload")
}

pub fn decode_reference(bytes: &[u8]) -> Result<RgbaImage> {
    let decoded = image::load_from_memory(bytes).context("decode reference image")?;
    Ok(decoded.to_rgba8())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub generation: u64,
    pub url: String,
}

#[derive(Debug)]
pub struct LoadCompletion {
    pub ticket: LoadTicket,
    pub result: Result<RgbaImage>,
}

pub struct ReferenceLoader {
    fetcher: Arc<dyn ImageFetcher>,
    latest: u64,
    pending: Option<LoadTicket>,
    tx: Sender<LoadCompletion>,
    rx: Receiver<LoadCompletion>,
}

impl std::fmt::Debug for ReferenceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceLoader")
            .field("latest", &self.latest)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl ReferenceLoader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        let (tx, rx) = channel();
        Self {
            fetcher,
            latest: 0,
            pending: None,
            tx,
            rx,
        }
    }

    pub fn pending(&self) -> Option<&LoadTicket> {
        self.pending.as_ref()
    }

    pub fn is_pending_for(&self, url: &str) -> bool {
        self.pending.as_ref().is_some_and(|t| t.url == url)
    }

    /// Starts a load on a worker thread. Any earlier request becomes stale.
    pub fn request(&mut self, url: &str) -> LoadTicket {
        let ticket = self.issue(url);
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.tx.clone();
        let job = ticket.clone();
        let spawned = std::thread::Builder::new()
            .name("reference-load".to_owned())
            .spawn(move || {
                let result = fetcher
                    .fetch(&job.url)
                    .and_then(|bytes| decode_reference(&bytes));
                // The engine may be gone; its result is simply dropped then.
                let _ = tx.send(LoadCompletion {
                    ticket: job,
                    result,
                });
            });
        if let Err(err) = spawned {
            let _ = self.tx.send(LoadCompletion {
                ticket: ticket.clone(),
                result: Err(anyhow!(err).context("spawn reference load worker")),
            });
        }
        ticket
    }

    /// Registers a request without spawning anything; the caller delivers the
    /// result itself.
    pub fn issue(&mut self, url: &str) -> LoadTicket {
        self.latest += 1;
        let ticket = LoadTicket {
            generation: self.latest,
            url: url.to_owned(),
        };
        tracing::debug!(url, generation = ticket.generation, "reference load requested");
        self.pending = Some(ticket.clone());
        ticket
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.latest
    }

    /// Marks `ticket` as finished if it is the current one.
    pub fn settle(&mut self, ticket: &LoadTicket) {
        if self.pending.as_ref() == Some(ticket) {
            self.pending = None;
        }
    }

    /// Makes every outstanding request stale.
    pub fn cancel_pending(&mut self) {
        self.latest += 1;
        self.pending = None;
    }

    pub fn try_next(&self) -> Option<LoadCompletion> {
        match self.rx.try_recv() {
            Ok(completion) => Some(completion),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn wait_next(&self, timeout: Duration) -> Option<LoadCompletion> {
        match self.rx.recv_timeout(timeout) {
            Ok(completion) => Some(completion),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}
