pub mod action;
pub mod coerce;
pub mod defaults;
pub mod diagnostics;
pub mod matcher;
pub mod spec;
pub mod trigger;

pub use crate::action::{Action, ActionKind, ActionPolicy, DEFAULT_ACTION_GROUP};
pub use crate::coerce::NotificationId;
pub use crate::defaults::{defaults_for, Defaults, Platform};
pub use crate::diagnostics::{Diagnostic, Diagnostics};
pub use crate::matcher::CalendarMatch;
pub use crate::spec::{NotificationSpec, Normalized, Normalizer};
pub use crate::trigger::{Repeat, ResolveContext, TimeUnit, Trigger};
