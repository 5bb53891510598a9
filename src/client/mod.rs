//! Client-side machinery: gateway API client, durable pending-payment
//! queue, and the background retry worker that drains it.

pub mod api;
pub mod pending;
pub mod retry;

pub use api::{GatewayApi, GatewayClient};
pub use pending::{DrainReport, PendingPayment, PendingQueue};
pub use retry::RetryWorker;
