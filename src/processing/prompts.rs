//! Prompt templates for summarization, query expansion, and answer composition.

use super::types::RetrievedMatch;
use crate::completion::ChatMessage;

pub(crate) const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Summarize one chunk; the chunk is embedded verbatim.
pub(crate) fn summarization_messages(chunk: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "You are a highly skilled assistant in summarizing conversations.\n\
             The user provided an interview conversation spanning 5-6 pages.\n\
             {chunk}\n\
             Summarize the conversation while including all key points, ensuring that no important details are missed.\n\
             Provide a clear and concise summary while maintaining the essence of the discussion."
        )),
    ]
}

pub(crate) fn expansion_messages(query: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Expand the following query by adding relevant keywords or synonyms while preserving intent: \"{query}\""
        )),
    ]
}

pub(crate) fn answer_messages(
    query: &str,
    expanded_query: &str,
    matches: &[RetrievedMatch],
) -> Vec<ChatMessage> {
    let mut results = String::new();
    for retrieved in matches {
        results.push_str(&format!(
            "- [{}] (score {:.3}): {}\n",
            retrieved.id, retrieved.score, retrieved.text
        ));
    }
    if results.is_empty() {
        results.push_str("(no results)\n");
    }

    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "The user asked: \"{query}\"\n\n\
             Expanded Query: \"{expanded_query}\"\n\n\
             Below are the retrieved search results:\n{results}\n\
             Using these results, provide a well-structured, relevant, and detailed response."
        )),
    ]
}
