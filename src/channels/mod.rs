pub mod line;
pub mod traits;
pub mod youtube;

pub use line::{LineClient, UserRegistry, WebhookEvent};
pub use traits::{ChatClient, ChatItem, ChatPage, Notifier};
pub use youtube::YouTubeLiveChat;
