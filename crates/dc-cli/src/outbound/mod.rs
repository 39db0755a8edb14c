pub mod openai_chat;

use std::sync::Arc;

use dc_core::core::ExternalGenerator;

use crate::bootstrap::ExternalSettings;

/// Builds the external generator for validated settings.
pub fn external_generator(
    settings: &ExternalSettings,
) -> Result<Arc<dyn ExternalGenerator>, anyhow::Error> {
    let generator = openai_chat::OpenAiChatGenerator::new(settings)?;
    Ok(Arc::new(generator))
}
