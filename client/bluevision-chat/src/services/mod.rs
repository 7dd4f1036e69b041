pub mod account_key;
pub mod composing;
pub mod directory;
pub mod feed;
pub mod message_store;
pub mod profile_service;

pub use account_key::AccountKey;
pub use composing::{ComposingIndicator, ComposingThrottle};
pub use directory::{derive_identity, filter_entries, ConversationDirectory, DirectoryEntry, DisplayIdentity};
pub use feed::{FeedController, FeedItem, FeedItemKey, FeedPhase, FeedView};
pub use message_store::MessageStore;
pub use profile_service::ProfileService;
