use async_trait::async_trait;

/// Turns one batch of chat into one reply.
///
/// Side-effect free from the run loop's perspective: a failure means "no
/// reply this cycle", never a fatal condition.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, transcript: &str, system_instruction: &str)
    -> anyhow::Result<String>;
}
