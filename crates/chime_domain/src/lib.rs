pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod service;

pub use crate::backend::{BackendEvent, BackendInbox, DeliveryBackend};
pub use crate::config::SchedulerConfig;
pub use crate::error::SchedulerError;
pub use crate::events::{EventKind, NotificationEvent};
pub use crate::registry::{LifecycleState, NotificationType, RegistryEntry};
pub use crate::service::{ScheduleReport, Scheduler, SchedulerBuilder};
