#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineLifecycle {
    Uninitialized,
    Ready,
    Disposed,
}

impl EngineLifecycle {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

pub fn can_transition(from: EngineLifecycle, to: EngineLifecycle) -> bool {
    matches!(
        (from, to),
        (EngineLifecycle::Uninitialized, EngineLifecycle::Ready)
            | (EngineLifecycle::Ready, EngineLifecycle::Disposed)
            | (EngineLifecycle::Uninitialized, EngineLifecycle::Disposed)
    ) || from == to
}
