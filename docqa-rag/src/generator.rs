//! Answer generator trait.

use async_trait::async_trait;

use crate::error::Result;

/// System instruction used when none is configured.
///
/// Fixes the model's domain of competence to the supplied context and tells
/// it how to refuse out-of-scope questions.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are an assistant that answers questions about the uploaded documentation.
Use only the information in the context passages supplied with each question.

Guidelines:
- Do not make assumptions or offer advice beyond what the context states.
- Do not mention the context passages or the documents by name.
- Respond concisely and professionally, using bullet points where they help.
- When the documentation includes examples or schemas, reproduce them faithfully.
- If the question is outside the scope of the documentation, say politely that \
the information is not available.";

/// A language model that produces the final answer.
///
/// Receives a fixed system instruction and a single text block holding the
/// assembled context followed by the question.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Generate an answer for `input` under `system_instruction`.
    async fn generate(&self, system_instruction: &str, input: &str) -> Result<String>;

    /// Model name used in errors and logs.
    fn name(&self) -> &str;
}
