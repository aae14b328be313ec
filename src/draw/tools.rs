//! Active tool, colour and width, with per-field host control.
//!
//! A field the host supplies at construction time is *controlled*: the engine
//! reads the host's current value on every access and its own setters leave it
//! alone. Fields the host does not supply keep an internal value that the
//! setters mutate (last writer wins).

use crate::draw::error::{EngineError, Result};
use crate::draw::model::{Rgba, StrokeStyle, Tool};
use std::cell::RefCell;
use std::rc::Rc;

/// A value shared between the host and the engine. The host keeps one clone
/// and writes to it; the engine keeps another and only reads.
#[derive(Debug, Default)]
pub struct HostField<T> {
    value: Rc<RefCell<T>>,
}

impl<T> Clone for HostField<T> {
    fn clone(&self) -> Self {
        Self {
            value: Rc::clone(&self.value),
        }
    }
}

impl<T: Clone> HostField<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Rc::new(RefCell::new(value)),
        }
    }

    pub fn set(&self, value: T) {
        *self.value.borrow_mut() = value;
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }
}

/// The set of fields a host may take control of. `None` leaves the field to
/// the engine.
#[derive(Debug, Clone, Default)]
pub struct HostControls {
    pub show_reference: Option<HostField<bool>>,
    pub active_color: Option<HostField<String>>,
    pub brush_size: Option<HostField<f32>>,
    pub tool: Option<HostField<Tool>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolBounds {
    pub min_width: f32,
    pub max_width: f32,
}

impl Default for ToolBounds {
    fn default() -> Self {
        Self {
            min_width: 1.0,
            max_width: 20.0,
        }
    }
}

impl ToolBounds {
    pub fn clamp(self, width: f32) -> f32 {
        width.clamp(self.min_width, self.max_width)
    }
}

#[derive(Debug, Clone)]
pub struct ToolState {
    bounds: ToolBounds,
    tool: Tool,
    color: Rgba,
    width: f32,
    host_tool: Option<HostField<Tool>>,
    host_color: Option<HostField<String>>,
    host_width: Option<HostField<f32>>,
}

impl ToolState {
    pub fn new(bounds: ToolBounds, color: Rgba, width: f32, controls: &HostControls) -> Self {
        Self {
            bounds,
            tool: Tool::Brush,
            color,
            width: bounds.clamp(width),
            host_tool: controls.tool.clone(),
            host_color: controls.active_color.clone(),
            host_width: controls.brush_size.clone(),
        }
    }

    pub fn tool(&self) -> Tool {
        match &self.host_tool {
            Some(field) => field.get(),
            None => self.tool,
        }
    }

    pub fn color(&self) -> Rgba {
        let Some(field) = &self.host_color else {
            return self.color;
        };
        let raw = field.get();
        match Rgba::from_hex(&raw) {
            Some(color) => color,
            None => {
                tracing::warn!(value = %raw, "host-supplied colour is not a hex colour, using internal colour");
                self.color
            }
        }
    }

    pub fn width(&self) -> f32 {
        let Some(field) = &self.host_width else {
            return self.width;
        };
        let raw = field.get();
        if raw.is_finite() && raw > 0.0 {
            self.bounds.clamp(raw)
        } else {
            tracing::warn!(value = raw, "host-supplied brush size is unusable, using minimum width");
            self.bounds.min_width
        }
    }

    /// Snapshot of the effective values, read fresh from the host each call.
    pub fn style(&self) -> StrokeStyle {
        StrokeStyle {
            tool: self.tool(),
            color: self.color(),
            width: self.width(),
        }
    }

    pub fn set_tool(&mut self, tool: Tool) {
        if self.host_tool.is_some() {
            tracing::debug!(?tool, "tool is host-controlled, ignoring internal set");
            return;
        }
        self.tool = tool;
    }

    pub fn set_color(&mut self, color: &str) -> Result<()> {
        let parsed = Rgba::from_hex(color).ok_or_else(|| {
            EngineError::InvalidToolParameter(format!("colour {color:?} is not a hex colour"))
        })?;
        if self.host_color.is_some() {
            tracing::debug!(color = %parsed, "colour is host-controlled, ignoring internal set");
            return Ok(());
        }
        self.color = parsed;
        Ok(())
    }

    /// Returns the width that will actually be used.
    pub fn set_width(&mut self, width: f32) -> Result<f32> {
        if !width.is_finite() || width < 0.0 {
            return Err(EngineError::InvalidToolParameter(format!(
                "brush width must be a finite non-negative number, got {width}"
            )));
        }
        let clamped = self.bounds.clamp(width);
        if clamped != width {
            tracing::debug!(requested = width, clamped, "brush width clamped");
        }
        if self.host_width.is_some() {
            tracing::debug!(width = clamped, "brush size is host-controlled, ignoring internal set");
            return Ok(self.width());
        }
        self.width = clamped;
        Ok(clamped)
    }
}
