pub mod config;
pub mod decode;
pub mod executor;
pub mod queued;
pub mod retry;
pub mod socket;
pub mod subscription;
pub mod transport;

pub use config::ExecutorConfig;
pub use decode::{attachment_filename, decode_response};
pub use executor::RequestExecutor;
pub use queued::{queued_event, replay_request};
pub use retry::{delay_for, with_retry};
pub use socket::{SocketChannel, SocketConnector, TungsteniteConnector};
pub use subscription::{SubscriptionHandle, SubscriptionManager};
pub use transport::{HttpTransport, ReqwestTransport, TransportResponse};
