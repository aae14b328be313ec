use crate::draw::model::{InkLayer, Point, Stroke, StrokeId, StrokeStyle};

/// What a recorder call changed, so the caller knows how much to repaint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecorderUpdate {
    /// Nothing changed (dropped point, or no open stroke).
    Ignored,
    /// A new stroke was opened at a single point.
    Began { id: StrokeId, sealed_previous: Option<StrokeId> },
    /// The open stroke grew by one segment.
    Extended { id: StrokeId, from: Point, to: Point },
    Sealed { id: StrokeId },
    Cancelled { id: StrokeId },
}

/// Turns pointer gestures into strokes on the ink layer.
#[derive(Debug, Default)]
pub struct StrokeRecorder {
    ink: InkLayer,
    next_id: u64,
}

impl StrokeRecorder {
    pub fn ink(&self) -> &InkLayer {
        &self.ink
    }

    pub fn is_recording(&self) -> bool {
        self.ink.active.is_some()
    }

    /// Opens a stroke. The style is copied, so later tool changes never touch
    /// segments already recorded. An open stroke is sealed first; two
    /// gestures are never merged.
    pub fn begin(&mut self, point: Point, style: StrokeStyle) -> RecorderUpdate {
        if !point.is_finite() {
            tracing::debug!(?point, "dropping non-finite stroke start");
            return RecorderUpdate::Ignored;
        }
        let sealed_previous = match self.end() {
            RecorderUpdate::Sealed { id } => {
                tracing::debug!(stroke_id = %id, "sealed open stroke before starting a new one");
                Some(id)
            }
            _ => None,
        };
        self.next_id += 1;
        let id = StrokeId(self.next_id);
        self.ink.active = Some(Stroke {
            id,
            style,
            points: vec![point],
        });
        RecorderUpdate::Began {
            id,
            sealed_previous,
        }
    }

    pub fn extend(&mut self, point: Point) -> RecorderUpdate {
        let Some(stroke) = self.ink.active.as_mut() else {
            return RecorderUpdate::Ignored;
        };
        if !point.is_finite() {
            tracing::debug!(stroke_id = %stroke.id, ?point, "dropping non-finite stroke point");
            return RecorderUpdate::Ignored;
        }
        let from = stroke.points.last().copied().unwrap_or(point);
        stroke.points.push(point);
        RecorderUpdate::Extended {
            id: stroke.id,
            from,
            to: point,
        }
    }

    /// Seals the open stroke. Without one this is a no-op.
    pub fn end(&mut self) -> RecorderUpdate {
        let Some(stroke) = self.ink.active.take() else {
            return RecorderUpdate::Ignored;
        };
        let id = stroke.id;
        tracing::debug!(stroke_id = %id, points = stroke.points.len(), tool = ?stroke.style.tool, "stroke sealed");
        self.ink.sealed.push(stroke);
        RecorderUpdate::Sealed { id }
    }

    /// Throws the open stroke away. Without one this is a no-op.
    pub fn cancel(&mut self) -> RecorderUpdate {
        match self.ink.active.take() {
            Some(stroke) => {
                tracing::debug!(stroke_id = %stroke.id, "stroke cancelled");
                RecorderUpdate::Cancelled { id: stroke.id }
            }
            None => RecorderUpdate::Ignored,
        }
    }

    pub fn clear(&mut self) {
        self.ink.clear();
    }
}
