//! LLM provider client for chat completions.

mod error;
mod frame;
mod openai;
mod provider;
mod types;

pub use error::{LLMError, check_response};
pub use frame::{FrameStream, decode_line};
pub use openai::OpenAICompatibleProvider;
pub use provider::LLMProvider;
pub use types::{
    ChatRequest, ChatResponse, ChatStream, Choice, ContentPart, Frame, MediaUrl, Message,
    MessageContent, ResponseMessage, Role, Usage,
};
