//! Domain records persisted by the commerce stores.

pub mod order;
pub mod payment;
pub mod plan;
pub mod profile;
pub mod subscription;
pub mod user;

pub use order::{ContactSnapshot, Order, OrderStatus};
pub use payment::{Payment, PaymentStatus};
pub use plan::{Plan, PlanDuration};
pub use profile::{Profile, ProfileChanges};
pub use subscription::{Subscription, SubscriptionStatus};
pub use user::User;
