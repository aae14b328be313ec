//! The drawing engine: owns the ink layer, the reference layer, tool state and
//! the live frame, and funnels every mutation through one place.

use crate::draw::composite::{flatten, Compositor, RgbaBuffer};
use crate::draw::error::{EngineError, Result};
use crate::draw::input::{RecorderUpdate, StrokeRecorder};
use crate::draw::messages::{LoadOutcome, ReferenceEvent};
use crate::draw::model::{InkLayer, Point, StrokeId, StrokeStyle, Tool};
use crate::draw::reference::{
    DefaultFetcher, ImageFetcher, LoadCompletion, LoadTicket, ReferenceImage, ReferenceLayer,
    ReferenceLoader,
};
use crate::draw::save::{download_file_name, encode_png, Raster};
use crate::draw::settings::EngineConfig;
use crate::draw::state::{can_transition, EngineLifecycle};
use crate::draw::tools::{HostControls, ToolState};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct DrawingEngine {
    config: EngineConfig,
    lifecycle: EngineLifecycle,
    recorder: StrokeRecorder,
    tools: ToolState,
    reference: ReferenceLayer,
    /// Dropped on dispose so late worker results have nowhere to land.
    loader: Option<ReferenceLoader>,
    /// URL whose last load failed; not retried until asked for explicitly.
    failed_reference: Option<String>,
    compositor: Compositor,
}

impl DrawingEngine {
    pub fn new(
        config: EngineConfig,
        controls: HostControls,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let tools = ToolState::new(
            config.tool_bounds(),
            config.default_color,
            config.default_width,
            &controls,
        );
        let reference = ReferenceLayer::new(
            config.reference_image_url.clone(),
            config.reference_opacity,
            config.show_reference,
            controls.show_reference.clone(),
        );
        let compositor = Compositor::new(config.logical_size(), config.eraser_reach);
        Ok(Self {
            config,
            lifecycle: EngineLifecycle::Uninitialized,
            recorder: StrokeRecorder::default(),
            tools,
            reference,
            loader: Some(ReferenceLoader::new(fetcher)),
            failed_reference: None,
            compositor,
        })
    }

    /// Uncontrolled engine that fetches references with [`DefaultFetcher`].
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        Self::new(config, HostControls::default(), Arc::new(DefaultFetcher))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> EngineLifecycle {
        self.lifecycle
    }

    pub fn ink(&self) -> &InkLayer {
        self.recorder.ink()
    }

    pub fn reference(&self) -> &ReferenceLayer {
        &self.reference
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn download_file_name(&self) -> String {
        download_file_name(self.config.lesson_title.as_deref())
    }

    fn transition(&mut self, to: EngineLifecycle) -> Result<()> {
        if !can_transition(self.lifecycle, to) {
            return Err(EngineError::EngineNotReady {
                state: self.lifecycle,
            });
        }
        tracing::debug!(from = ?self.lifecycle, to = ?to, "engine lifecycle transition");
        self.lifecycle = to;
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.lifecycle.is_ready() {
            Ok(())
        } else {
            Err(EngineError::EngineNotReady {
                state: self.lifecycle,
            })
        }
    }

    /// Allocates the live surface and starts the initial reference load.
    pub fn attach(&mut self) -> Result<()> {
        if self.lifecycle.is_ready() {
            return Ok(());
        }
        self.transition(EngineLifecycle::Ready)?;
        let (width, height) = self.config.logical_size();
        tracing::info!(width, height, "drawing surface attached");
        self.repaint();
        Ok(())
    }

    /// Releases the surface and abandons any in-flight reference load.
    pub fn dispose(&mut self) {
        if self.lifecycle == EngineLifecycle::Disposed {
            return;
        }
        self.lifecycle = EngineLifecycle::Disposed;
        self.recorder.cancel();
        self.loader = None;
        self.compositor.invalidate();
        tracing::info!("drawing surface disposed");
    }

    pub fn begin(&mut self, point: Point) -> Result<Option<StrokeId>> {
        self.ensure_ready()?;
        let style = self.tools.style();
        match self.recorder.begin(point, style) {
            RecorderUpdate::Began { id, .. } => {
                tracing::debug!(stroke_id = %id, tool = ?style.tool, color = %style.color, width = style.width, "stroke started");
                self.paint_segment(style, point, point);
                Ok(Some(id))
            }
            _ => Ok(None),
        }
    }

    pub fn extend(&mut self, point: Point) -> Result<()> {
        self.ensure_ready()?;
        if let RecorderUpdate::Extended { from, to, .. } = self.recorder.extend(point) {
            if let Some(style) = self.recorder.ink().active.as_ref().map(|s| s.style) {
                self.paint_segment(style, from, to);
            }
        }
        Ok(())
    }

    /// Seals the open stroke. Idempotent, and a no-op outside `Ready`.
    pub fn end(&mut self) -> Option<StrokeId> {
        if !self.lifecycle.is_ready() {
            return None;
        }
        match self.recorder.end() {
            RecorderUpdate::Sealed { id } => Some(id),
            _ => None,
        }
    }

    /// Discards the open stroke. Idempotent, and a no-op outside `Ready`.
    pub fn cancel(&mut self) -> Option<StrokeId> {
        if !self.lifecycle.is_ready() {
            return None;
        }
        match self.recorder.cancel() {
            RecorderUpdate::Cancelled { id } => {
                self.repaint();
                Some(id)
            }
            _ => None,
        }
    }

    pub fn set_tool(&mut self, tool: Tool) -> Result<()> {
        self.ensure_ready()?;
        self.tools.set_tool(tool);
        Ok(())
    }

    pub fn set_color(&mut self, color: &str) -> Result<()> {
        self.ensure_ready()?;
        self.tools.set_color(color)
    }

    /// Returns the effective width after clamping.
    pub fn set_width(&mut self, width: f32) -> Result<f32> {
        self.ensure_ready()?;
        self.tools.set_width(width)
    }

    /// Flips the internal visibility flag and re-renders. Returns `None` when
    /// visibility is host-controlled and nothing was flipped.
    pub fn toggle_reference(&mut self) -> Result<Option<bool>> {
        self.ensure_ready()?;
        let flipped = self.reference.toggle();
        match flipped {
            Some(visible) => {
                tracing::debug!(visible, "reference visibility toggled");
                self.repaint();
            }
            None => tracing::debug!("reference visibility is host-controlled, leaving it to the host"),
        }
        Ok(flipped)
    }

    /// Drops every stroke; the reference layer is left alone.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.recorder.clear();
        self.repaint();
        Ok(())
    }

    /// Full re-render of the live surface. Also picks up host-controlled
    /// values that changed since the last render.
    pub fn render(&mut self) -> Result<&RgbaBuffer> {
        self.ensure_ready()?;
        self.ensure_reference_requested();
        Ok(self.compositor.render(self.recorder.ink(), &self.reference))
    }

    pub fn surface(&self) -> Option<&RgbaBuffer> {
        self.compositor.surface()
    }

    /// Composes the current state at `multiplier` times the logical size and
    /// flattens it over the paper colour. Read-only.
    pub fn export_buffer(&self, multiplier: f32) -> Result<RgbaBuffer> {
        self.ensure_ready()?;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(EngineError::ExportFailed(format!(
                "export multiplier must be positive, got {multiplier}"
            )));
        }
        let composed = self
            .compositor
            .compose(self.recorder.ink(), &self.reference, multiplier)?;
        Ok(flatten(&composed, self.config.background_color))
    }

    pub fn export_raster(&self, multiplier: f32) -> Result<Raster> {
        let buffer = self.export_buffer(multiplier)?;
        let raster = encode_png(&buffer).inspect_err(|err| {
            tracing::warn!(error = %err, "raster export failed");
        })?;
        tracing::debug!(
            width = raster.width,
            height = raster.height,
            bytes = raster.png.len(),
            "raster exported"
        );
        Ok(raster)
    }

    /// Points the reference layer at `url`. The load starts right away when
    /// the layer is visible, otherwise the next time it is shown.
    pub fn load_reference(&mut self, url: &str) -> Result<Option<LoadTicket>> {
        self.ensure_ready()?;
        self.reference.set_source_url(Some(url.to_owned()));
        self.failed_reference = None;
        let visible = self.reference.visible();
        let loader = self.loader_mut()?;
        if visible {
            Ok(Some(loader.request(url)))
        } else {
            loader.cancel_pending();
            tracing::debug!(url, "reference hidden, deferring load");
            Ok(None)
        }
    }

    /// Registers a load without spawning a worker. For hosts that fetch and
    /// decode on their own runtime and hand the result to [`Self::deliver`].
    pub fn issue_reference_load(&mut self, url: &str) -> Result<LoadTicket> {
        self.ensure_ready()?;
        self.reference.set_source_url(Some(url.to_owned()));
        self.failed_reference = None;
        Ok(self.loader_mut()?.issue(url))
    }

    fn loader_mut(&mut self) -> Result<&mut ReferenceLoader> {
        let state = self.lifecycle;
        self.loader
            .as_mut()
            .ok_or(EngineError::EngineNotReady { state })
    }

    /// Applies finished loads without blocking.
    pub fn poll_reference(&mut self) -> Vec<ReferenceEvent> {
        let mut events = Vec::new();
        while let Some(completion) = self.loader.as_ref().and_then(ReferenceLoader::try_next) {
            events.extend(self.deliver(completion));
        }
        events
    }

    /// Blocks until the most recent load settles or `timeout` runs out.
    /// Stale completions received on the way are applied (discarded) too.
    pub fn wait_reference(&mut self, timeout: Duration) -> Option<ReferenceEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            self.loader.as_ref()?.pending()?;
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let completion = self.loader.as_ref()?.wait_next(remaining)?;
            match self.deliver(completion) {
                Some(event) if event.outcome != LoadOutcome::Stale => return Some(event),
                _ => continue,
            }
        }
    }

    /// Applies one load result. Results for anything but the latest request
    /// are reported stale and dropped. After dispose nothing is applied.
    pub fn deliver(&mut self, completion: LoadCompletion) -> Option<ReferenceEvent> {
        let LoadCompletion { ticket, result } = completion;
        let ready = self.lifecycle.is_ready();
        let Some(loader) = self.loader.as_mut().filter(|_| ready) else {
            tracing::debug!(url = %ticket.url, generation = ticket.generation, "engine not ready, discarding reference result");
            return None;
        };
        if !loader.is_current(&ticket) {
            tracing::debug!(url = %ticket.url, generation = ticket.generation, "discarding stale reference result");
            return Some(ReferenceEvent {
                url: ticket.url,
                generation: ticket.generation,
                outcome: LoadOutcome::Stale,
            });
        }
        loader.settle(&ticket);
        let outcome = match result {
            Ok(image) => {
                tracing::info!(url = %ticket.url, width = image.width(), height = image.height(), "reference image loaded");
                self.reference.apply(ReferenceImage::new(
                    ticket.url.clone(),
                    image,
                    self.config.logical_size(),
                ));
                self.repaint();
                LoadOutcome::Applied
            }
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::warn!(url = %ticket.url, error = %reason, "reference image failed to load");
                self.failed_reference = Some(ticket.url.clone());
                LoadOutcome::Failed(EngineError::reference_load_failed(&ticket.url, &err))
            }
        };
        Some(ReferenceEvent {
            url: ticket.url,
            generation: ticket.generation,
            outcome,
        })
    }

    fn ensure_reference_requested(&mut self) {
        if !self.reference.needs_load() {
            return;
        }
        let (Some(url), Some(loader)) = (self.reference.source_url(), self.loader.as_mut()) else {
            return;
        };
        if loader.is_pending_for(url) || self.failed_reference.as_deref() == Some(url) {
            return;
        }
        loader.request(url);
    }

    fn repaint(&mut self) {
        if !self.lifecycle.is_ready() {
            return;
        }
        self.ensure_reference_requested();
        self.compositor.render(self.recorder.ink(), &self.reference);
    }

    /// Paints just the new segment when the live frame still matches the
    /// reference state, otherwise re-renders everything.
    fn paint_segment(&mut self, style: StrokeStyle, from: Point, to: Point) {
        if self.compositor.is_current(&self.reference) {
            self.compositor.apply_segment(&style, from, to);
        } else {
            self.repaint();
        }
    }
}
