pub mod openai;

pub use openai::AssistantsClient;
