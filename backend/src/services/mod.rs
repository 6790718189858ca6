// Collaborators the engine talks to: outbound messaging, user lookup and the
// delayed-action queue.

pub mod email;
pub mod memory;
pub mod notifications;
pub mod scheduling;
pub mod users;
pub mod webhooks;

pub use email::{EmailSender, SmtpEmailService};
pub use notifications::{ChannelMask, Notification, NotificationSender, PgNotificationService};
pub use scheduling::{DelayedActionScheduler, DelayedActionSource, PgDelayedActionQueue};
pub use users::{PgUserDirectory, UserContact, UserDirectory};
pub use webhooks::{HttpWebhookDispatcher, WebhookDelivery, WebhookDispatcher, WebhookRequest};

#[cfg(test)]
pub use email::MockEmailSender;
#[cfg(test)]
pub use notifications::MockNotificationSender;
#[cfg(test)]
pub use scheduling::MockDelayedActionScheduler;
#[cfg(test)]
pub use users::MockUserDirectory;
#[cfg(test)]
pub use webhooks::MockWebhookDispatcher;
