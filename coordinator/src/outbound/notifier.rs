//! Notifier adapter that reports reminders through `tracing`.

use tracing::info;

use crate::domain::ports::{LocationReminder, Notifier};

/// Emits each reminder as a structured `info` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, reminder: &LocationReminder) {
        info!(
            notification_id = %reminder.notification_id,
            title = %reminder.title,
            body = %reminder.body,
            "location reminder"
        );
    }
}
