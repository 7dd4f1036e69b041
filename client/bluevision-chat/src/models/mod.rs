pub mod conversation;
pub mod message;
pub mod profile;
pub mod realtime;

pub use conversation::{Conversation, ConversationKind, ConversationWithMembers, NewConversation, Participant};
pub use message::{Message, MessageWithSender, NewMessage, SenderProfile};
pub use profile::{AuthorDisplay, Profile, ProfileUpdate, PLACEHOLDER_LABEL};
pub use realtime::{composing_topic, BroadcastMessage, ChannelEvent, ComposingSignal, COMPOSING_EVENT};
