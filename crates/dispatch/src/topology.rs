//! Broker topology for notification dispatch.
//!
//! ```text
//! notifications.direct (direct) --<type>.queue--> <type>.queue  [x-max-priority=10]
//!                                                      | dead-letter
//!                                                      v
//! dlx.notifications (direct) --dl.<type>.queue--> dl.<type>.queue
//! ```

use lapin::types::{AMQPValue, FieldTable};

use notigate_common::types::NotificationType;

/// Direct exchange that routes notifications to per-type queues.
pub const EXCHANGE: &str = "notifications.direct";

/// Exchange receiving rejected, expired or requeue-exhausted messages.
pub const DEAD_LETTER_EXCHANGE: &str = "dlx.notifications";

/// Highest priority a queue honours; larger values are clamped.
pub const MAX_PRIORITY: u8 = 10;

/// Persistent delivery mode (AMQP `delivery-mode = 2`).
pub const PERSISTENT: u8 = 2;

/// Declaration arguments for the primary queue of a notification type.
pub fn queue_arguments(notification_type: NotificationType) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-max-priority".into(),
        AMQPValue::LongInt(i32::from(MAX_PRIORITY)),
    );
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(notification_type.dead_letter_routing_key().into()),
    );
    args
}

/// Clamp a caller-supplied priority to the queue ceiling.
pub fn clamp_priority(priority: u8) -> u8 {
    priority.min(MAX_PRIORITY)
}
