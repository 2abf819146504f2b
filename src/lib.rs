pub mod config;
pub mod error;
pub mod logger;
pub mod message;
pub mod model;
pub mod processor;
pub mod publisher;
pub mod queue;
pub mod schema;
pub mod supervisor;
pub mod util;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{ConfigError, PublishError, QueueError, SupervisorError};
pub use message::{Delivery, Envelope, FitResult, Publication};
pub use model::{FitModel, ModelRegistry};
pub use processor::{Processor, SkipReason, Step};
pub use supervisor::{Supervisor, WorkerStatus};
pub use worker::{WorkerState, WorkerStats};
