//! Rendering collaborators.
//!
//! The session never draws anything. Notifications, confirmation prompts and
//! UI updates are handed to a [`Presenter`]; the CLI uses
//! [`TracingPresenter`], which turns them into log events.

use crate::effects::{ConfirmRequest, Notification, NotificationLevel, UiUpdate};
use tracing::{debug, error, info, warn};

/// Narrow rendering interface used by the runtime.
///
/// Implementations must not block; the runtime calls them from the session
/// task.
pub trait Presenter: Send + 'static {
    fn notify(&mut self, notification: &Notification);

    /// Show a yes/no question. The answer is delivered later through
    /// [`SessionHandle::confirm`](crate::runtime::SessionHandle::confirm).
    fn confirm(&mut self, request: &ConfirmRequest);

    fn update_ui(&mut self, update: &UiUpdate);
}

/// Presenter that logs every request.
#[derive(Debug, Default, Clone)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn notify(&mut self, notification: &Notification) {
        match notification.level {
            NotificationLevel::Info | NotificationLevel::Success => {
                info!(level = %notification.level, "{}", notification.message)
            }
            NotificationLevel::Warning => warn!("{}", notification.message),
            NotificationLevel::Error => error!("{}", notification.message),
        }
    }

    fn confirm(&mut self, request: &ConfirmRequest) {
        warn!(
            id = %request.id,
            title = %request.title,
            "{} (answer with `yes {}` or `no {}`)",
            request.message,
            request.id.0,
            request.id.0
        );
    }

    fn update_ui(&mut self, update: &UiUpdate) {
        match update {
            UiUpdate::Plot(plot) => debug!(target = ?plot.target, source = ?plot.source, "Plot data"),
            UiUpdate::Memory(_) => debug!("Memory usage updated"),
            UiUpdate::AcquisitionMode(mode) => info!(%mode, "Acquisition mode"),
            UiUpdate::ControlUnit(status) => info!(%status, "Control unit"),
            UiUpdate::Hv(status) => info!(%status, "High voltage"),
            UiUpdate::FileList {
                catalog,
                presentation,
                files,
            } => info!(%catalog, ?presentation, ?files, "File list"),
            UiUpdate::RunList { kind, entries } => {
                info!(%kind, count = entries.len(), "Run list");
                for entry in entries {
                    debug!(run = %entry.name, notes = %entry.notes);
                }
            }
            UiUpdate::Download { url } => info!(%url, "Download ready"),
            UiUpdate::Dialog(dialog) => info!(?dialog, "Dialog requested"),
            other => debug!(update = ?other, "UI update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::ConfirmId;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn tracing_presenter_logs_confirmation_id() {
        let mut presenter = TracingPresenter;
        presenter.confirm(&ConfirmRequest {
            id: ConfirmId(7),
            title: "Delete?".into(),
            message: "Are you sure to delete this background file?".into(),
        });
        assert!(logs_contain("yes 7"));
    }
}
