//! Alert delivery for vitalwatch.
//!
//! - [`registry`]: who is listening, keyed by patient and role.
//! - [`sink`]: push and bounded-queue delivery endpoints.
//! - [`lifecycle`]: raise, acknowledge and escalate alerts.
//! - [`scheduler`]: cancellable escalation timers.
//! - [`pipeline`]: readings in, alerts out.

pub mod event;
pub mod lifecycle;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod sink;

pub use event::AlertEvent;
pub use lifecycle::{Acknowledger, AlertLifecycleManager, LifecycleConfig};
pub use pipeline::AlertPipeline;
pub use registry::{PatientScope, SubscriberRegistry, SubscriptionGuard, SubscriptionHandle};
pub use scheduler::EscalationScheduler;
pub use sink::{AlertSink, PushFrame, PushSink, QueueSink, SinkError};
