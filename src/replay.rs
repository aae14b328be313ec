//! Replays a recorded gesture script through a [`Canvas`].
//!
//! Scripts are JSON arrays of steps such as
//! `{"op": "begin", "x": 10, "y": 10}` or `{"op": "set_color", "color": "#ff6b6b"}`.

use crate::draw::control::Canvas;
use crate::draw::model::{Point, Tool};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptStep {
    Begin { x: f32, y: f32 },
    Extend { x: f32, y: f32 },
    End,
    Cancel,
    SetTool { tool: Tool },
    SetColor { color: String },
    SetWidth { width: f32 },
    ToggleReference,
    LoadReference { url: String },
    Clear,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub rejected: usize,
    pub strokes: usize,
}

pub fn load_script(path: &Path) -> Result<Vec<ScriptStep>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read gesture script {}", path.display()))?;
    parse_script(&content).with_context(|| format!("parse gesture script {}", path.display()))
}

pub fn parse_script(content: &str) -> Result<Vec<ScriptStep>> {
    Ok(serde_json::from_str(content)?)
}

/// Rejected steps (bad colours, negative widths, ...) are logged and skipped;
/// the rest of the script still runs.
pub fn replay(canvas: &Canvas, steps: &[ScriptStep]) -> ReplaySummary {
    let handle = canvas.handle();
    let mut summary = ReplaySummary::default();
    for (index, step) in steps.iter().enumerate() {
        let outcome = match step {
            ScriptStep::Begin { x, y } => canvas.pointer_down(Point::new(*x, *y)).map(|_| ()),
            ScriptStep::Extend { x, y } => canvas.pointer_move(Point::new(*x, *y)),
            ScriptStep::End => {
                canvas.pointer_up();
                Ok(())
            }
            ScriptStep::Cancel => {
                canvas.pointer_cancel();
                Ok(())
            }
            ScriptStep::SetTool { tool } => handle.set_tool(*tool),
            ScriptStep::SetColor { color } => handle.set_color(color),
            ScriptStep::SetWidth { width } => handle.set_width(*width).map(|_| ()),
            ScriptStep::ToggleReference => handle.toggle_reference(),
            ScriptStep::LoadReference { url } => canvas.load_reference(url).map(|_| ()),
            ScriptStep::Clear => handle.clear(),
        };
        match outcome {
            Ok(()) => summary.applied += 1,
            Err(err) => {
                tracing::warn!(step = index, ?step, error = %err, "script step rejected");
                summary.rejected += 1;
            }
        }
        canvas.pump();
    }
    canvas.pointer_up();
    summary.strokes = canvas.inspect(|engine| engine.ink().sealed.len());
    summary
}
