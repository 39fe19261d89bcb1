pub mod error;
pub mod gateway;
pub mod jwt;
pub mod metrics;
pub mod orders;
pub mod otp;
pub mod otp_store;
pub mod profile;
pub mod store;
pub mod subscriptions;
pub mod zarinpal;

pub use error::ServiceError;
pub use gateway::{GatewayError, PaymentGateway};
pub use jwt::JwtService;
pub use metrics::{get_metrics, init_metrics};
pub use orders::{CallbackOutcome, OrderDetail, OrderService};
pub use otp::OtpAuthenticator;
pub use otp_store::{LogOtpSender, MemoryOtpStore, OtpSender, OtpStore, RedisOtpStore};
pub use profile::{ProfileDetail, ProfileService};
pub use store::{CommerceStore, MemoryStore, PostgresStore};
pub use subscriptions::SubscriptionService;
pub use zarinpal::ZarinpalClient;
