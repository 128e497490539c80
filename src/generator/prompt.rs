/// Grounding prompt shared by the remote providers: answer only from the
/// supplied context and say so when the answer is not there.
const INSTRUCTIONS: &str = "You are a helpful assistant. Answer the question using ONLY the \
context below. If the answer is not in the context, say clearly that the documents do not \
contain it.";

/// Plain grounding prompt used by the hosted API.
pub fn grounded_prompt(context: &str, query: &str) -> String {
    format!("Instructions: {INSTRUCTIONS}\n\nContext:\n---\n{context}\n---\n\nQuestion: \"{query}\"\n")
}

/// Same prompt wrapped in instruction tags for local instruct models.
pub fn instruct_prompt(context: &str, query: &str) -> String {
    format!("[INST] {INSTRUCTIONS}\n\nContext:\n---\n{context}\n---\n\nQuestion: \"{query}\" [/INST]\n")
}
