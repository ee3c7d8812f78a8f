use chime_core::NotificationId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// `schedule` was called for an id that is still scheduled or showing.
    /// Use `update` to replace it.
    #[error("notification {0} is already scheduled")]
    DuplicateId(NotificationId),
}
