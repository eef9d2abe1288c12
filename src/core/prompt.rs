use async_trait::async_trait;

/// Yes/no questions asked during interactive or test runs.
#[async_trait]
pub trait Prompt: Send + Sync {
    async fn confirm(&self, question: &str, default: bool) -> bool;
}

/// Answers every question with its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl Prompt for AutoConfirm {
    async fn confirm(&self, question: &str, default: bool) -> bool {
        log::debug!("[prompt] {question} -> {default}");
        default
    }
}
