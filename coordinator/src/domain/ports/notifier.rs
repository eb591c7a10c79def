//! Port for user-facing location reminders.

/// Reminder shown when the device enters a saved place.
///
/// `notification_id` is the place id, so a repeated entry replaces the
/// previous reminder instead of stacking a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationReminder {
    /// Identifier that replaces an earlier reminder for the same place.
    pub notification_id: String,
    /// Reminder headline.
    pub title: String,
    /// Reminder text.
    pub body: String,
}

/// Delivers reminders to the user.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Show `reminder` to the user.
    fn notify(&self, reminder: &LocationReminder);
}
