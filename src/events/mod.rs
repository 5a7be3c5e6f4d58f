pub mod application;
pub mod window;

pub use application::{AppIdentity, ApplicationInfo, RunningApplication};
pub use window::WindowIdentity;

/// События рантайма, на которые подписан загрузчик
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    ApplicationCreated(AppIdentity),
    /// Доставляется только для приложений с зарегистрированным слушателем
    ApplicationClosed(AppIdentity),
    /// Доставляется один раз для окон с зарегистрированным слушателем
    WindowClosed(WindowIdentity),
}

impl std::fmt::Display for RuntimeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeEvent::ApplicationCreated(app) => write!(f, "application-created {}", app),
            RuntimeEvent::ApplicationClosed(app) => write!(f, "application-closed {}", app),
            RuntimeEvent::WindowClosed(window) => write!(f, "window-closed {}", window),
        }
    }
}
