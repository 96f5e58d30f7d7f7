use rust_embed::RustEmbed;

/// Prompt templates bundled into the binary.
#[derive(RustEmbed)]
#[folder = "assets/prompts/"]
pub struct PromptAssets;
