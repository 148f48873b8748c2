pub mod config;
pub mod error;
pub mod io_struct;
pub mod relay;
pub mod server;
pub mod sse;
pub mod upstream;

pub use config::{CredentialSource, RelayConfig, UpstreamConfig};
pub use error::RelayError;
pub use relay::RelayHandler;
pub use upstream::{CompletionResult, FragmentStream, UpstreamClient};
