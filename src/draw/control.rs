//! Host-facing control surface.
//!
//! [`Canvas`] is what the embedding page holds: it feeds pointer events in and
//! pumps reference-load results. [`ControlHandle`] is the narrow capability the
//! page passes around to trigger clear/download/complete and the tool setters
//! without reaching into engine state. Hooks always run after the engine
//! borrow is released, so a hook may call back into the handle.

use crate::draw::composite::RgbaBuffer;
use crate::draw::engine::DrawingEngine;
use crate::draw::error::{EngineError, Result};
use crate::draw::messages::{DownloadArtifact, LoadOutcome, ReferenceEvent};
use crate::draw::model::{Point, Rgba, StrokeId, Tool};
use crate::draw::reference::{ImageFetcher, LoadCompletion, LoadTicket};
use crate::draw::save::Raster;
use crate::draw::settings::EngineConfig;
use crate::draw::tools::HostControls;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

pub type CompleteHook = Box<dyn FnMut(&Raster)>;
pub type DownloadHook = Box<dyn FnMut(&DownloadArtifact)>;
pub type ToggleReferenceHook = Box<dyn FnMut()>;
pub type ReferenceErrorHook = Box<dyn FnMut(&EngineError)>;

#[derive(Default)]
pub struct HostHooks {
    pub on_complete: Option<CompleteHook>,
    pub on_download: Option<DownloadHook>,
    pub on_toggle_reference: Option<ToggleReferenceHook>,
    pub on_reference_error: Option<ReferenceErrorHook>,
}

impl std::fmt::Debug for HostHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHooks")
            .field("on_complete", &self.on_complete.is_some())
            .field("on_download", &self.on_download.is_some())
            .field("on_toggle_reference", &self.on_toggle_reference.is_some())
            .field("on_reference_error", &self.on_reference_error.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct Shared {
    engine: RefCell<DrawingEngine>,
    hooks: RefCell<HostHooks>,
}

/// Takes the hook out of its slot while it runs, so a re-entrant call finds
/// the slot empty instead of hitting a double borrow.
macro_rules! call_hook {
    ($shared:expr, $slot:ident, $($arg:expr),*) => {{
        let hook = $shared.hooks.borrow_mut().$slot.take();
        if let Some(mut hook) = hook {
            hook($($arg),*);
            let mut hooks = $shared.hooks.borrow_mut();
            if hooks.$slot.is_none() {
                hooks.$slot = Some(hook);
            }
        }
    }};
}

#[derive(Debug)]
pub struct Canvas {
    shared: Rc<Shared>,
}

impl Canvas {
    pub fn new(
        config: EngineConfig,
        controls: HostControls,
        fetcher: Arc<dyn ImageFetcher>,
        hooks: HostHooks,
    ) -> Result<Self> {
        let engine = DrawingEngine::new(config, controls, fetcher)?;
        Ok(Self {
            shared: Rc::new(Shared {
                engine: RefCell::new(engine),
                hooks: RefCell::new(hooks),
            }),
        })
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            shared: Rc::clone(&self.shared),
        }
    }

    /// Read-only look at the engine.
    pub fn inspect<R>(&self, f: impl FnOnce(&DrawingEngine) -> R) -> R {
        f(&self.shared.engine.borrow())
    }

    pub fn attach(&self) -> Result<()> {
        self.shared.engine.borrow_mut().attach()
    }

    pub fn dispose(&self) {
        self.shared.engine.borrow_mut().dispose();
    }

    pub fn pointer_down(&self, point: Point) -> Result<Option<StrokeId>> {
        self.shared.engine.borrow_mut().begin(point)
    }

    pub fn pointer_move(&self, point: Point) -> Result<()> {
        self.shared.engine.borrow_mut().extend(point)
    }

    pub fn pointer_up(&self) -> Option<StrokeId> {
        self.shared.engine.borrow_mut().end()
    }

    /// Pointer left the canvas or a competing gesture took over.
    pub fn pointer_cancel(&self) -> Option<StrokeId> {
        self.shared.engine.borrow_mut().cancel()
    }

    /// Re-renders and returns a copy of the live surface.
    pub fn render(&self) -> Result<RgbaBuffer> {
        self.shared.engine.borrow_mut().render().cloned()
    }

    pub fn load_reference(&self, url: &str) -> Result<Option<LoadTicket>> {
        self.shared.engine.borrow_mut().load_reference(url)
    }

    pub fn issue_reference_load(&self, url: &str) -> Result<LoadTicket> {
        self.shared.engine.borrow_mut().issue_reference_load(url)
    }

    /// Applies any finished reference loads and reports failures to the host.
    pub fn pump(&self) -> Vec<ReferenceEvent> {
        let events = self.shared.engine.borrow_mut().poll_reference();
        for event in &events {
            self.report(event);
        }
        events
    }

    pub fn wait_reference(&self, timeout: Duration) -> Option<ReferenceEvent> {
        let event = self.shared.engine.borrow_mut().wait_reference(timeout);
        if let Some(event) = &event {
            self.report(event);
        }
        event
    }

    pub fn deliver(&self, completion: LoadCompletion) -> Option<ReferenceEvent> {
        let event = self.shared.engine.borrow_mut().deliver(completion);
        if let Some(event) = &event {
            self.report(event);
        }
        event
    }

    fn report(&self, event: &ReferenceEvent) {
        if let LoadOutcome::Failed(err) = &event.outcome {
            call_hook!(self.shared, on_reference_error, err);
        }
    }
}

/// The operations a host may trigger on a canvas it does not otherwise own.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    shared: Rc<Shared>,
}

impl ControlHandle {
    pub fn clear(&self) -> Result<()> {
        self.shared.engine.borrow_mut().clear()?;
        tracing::info!("canvas cleared");
        Ok(())
    }

    /// Exports at the configured multiplier and hands the file to the host's
    /// save mechanism.
    pub fn download(&self) -> Result<DownloadArtifact> {
        let artifact = {
            let engine = self.shared.engine.borrow();
            DownloadArtifact {
                file_name: engine.download_file_name(),
                raster: engine.export_raster(engine.config().export_multiplier)?,
            }
        };
        call_hook!(self.shared, on_download, &artifact);
        tracing::info!(file_name = %artifact.file_name, bytes = artifact.raster.png.len(), "artwork downloaded");
        Ok(artifact)
    }

    /// Exports at the configured multiplier for hand-off to the host. Engine
    /// state is left untouched.
    pub fn complete(&self) -> Result<Raster> {
        let raster = {
            let engine = self.shared.engine.borrow();
            engine.export_raster(engine.config().export_multiplier)?
        };
        call_hook!(self.shared, on_complete, &raster);
        tracing::info!(width = raster.width, height = raster.height, "lesson completed");
        Ok(raster)
    }

    pub fn set_tool(&self, tool: Tool) -> Result<()> {
        self.shared.engine.borrow_mut().set_tool(tool)
    }

    pub fn set_color(&self, color: &str) -> Result<()> {
        self.shared.engine.borrow_mut().set_color(color)
    }

    pub fn set_width(&self, width: f32) -> Result<f32> {
        self.shared.engine.borrow_mut().set_width(width)
    }

    /// Swatches the host offers next to the canvas, in display order.
    pub fn palette(&self) -> Vec<Rgba> {
        self.shared.engine.borrow().config().palette.clone()
    }

    /// Picks swatch `index` as the brush colour and returns it.
    pub fn select_swatch(&self, index: usize) -> Result<Rgba> {
        let mut engine = self.shared.engine.borrow_mut();
        let swatch = engine.config().palette.get(index).copied().ok_or_else(|| {
            EngineError::InvalidToolParameter(format!(
                "swatch {index} is outside the {}-colour palette",
                engine.config().palette.len()
            ))
        })?;
        engine.set_color(&swatch.to_hex())?;
        Ok(swatch)
    }

    /// Uncontrolled: flips visibility and re-renders, then notifies the host.
    /// Host-controlled: only notifies the host, which flips its own value;
    /// the surface is re-rendered afterwards to pick that up.
    pub fn toggle_reference(&self) -> Result<()> {
        let flipped = self.shared.engine.borrow_mut().toggle_reference()?;
        call_hook!(self.shared, on_toggle_reference,);
        if flipped.is_none() {
            self.shared.engine.borrow_mut().render()?;
        }
        Ok(())
    }
}
