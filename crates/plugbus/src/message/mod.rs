//! # Messages
//!
//! The envelope every peer exchanges, its partitioned type space, and the
//! structured action URL it may carry.

mod envelope;
mod kind;
mod url;

pub use envelope::Message;
pub use kind::Band;
pub use kind::MessageType;
pub use url::StructuredUrl;
pub use url::UrlError;
