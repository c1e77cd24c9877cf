pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod hash;
pub mod perceptual;
pub mod record;
pub mod types;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock, offset, until};
pub use config::{BlocklistRequestConfig, GuardConfig, RetryConfig};
pub use error::{ConfigError, PerceptualError};
pub use hash::{CONTENT_HASH_HEX_LEN, ContentHash};
pub use perceptual::{DEFAULT_GRID_SIZE, Fingerprint, PerceptualHasher};
pub use record::{HashRecord, RetryQueueRecord};
pub use types::{AttachmentId, ConversationId};
