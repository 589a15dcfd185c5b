pub mod schema;

pub use schema::{
    BotConfig, Config, GatewayConfig, GeminiConfig, LineConfig, NoSessionPolicy, YouTubeConfig,
};
