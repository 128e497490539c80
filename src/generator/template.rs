use tracing::debug;

/// Contexts shorter than this (after trimming) count as "nothing found".
pub const MIN_CONTEXT_CHARS: usize = 10;
/// Number of context characters quoted in the excerpt answer.
pub const EXCERPT_CHARS: usize = 800;

pub const NO_INFORMATION: &str = "I could not find any relevant information in the documents.";

/// Offline last-resort provider. Never fails and needs no backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub const MODEL_NAME: &'static str = "Simple template";

    pub fn generate(&self, context: &str, _query: &str) -> String {
        debug!("Generating answer with the template provider");
        if context.trim().chars().count() < MIN_CONTEXT_CHARS {
            return NO_INFORMATION.to_string();
        }
        let excerpt: String = context.chars().take(EXCERPT_CHARS).collect();
        format!("Based on the documents, here is an excerpt: \"{excerpt}...\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_context() {
        assert_eq!(TemplateGenerator.generate("", "q"), NO_INFORMATION);
        assert_eq!(TemplateGenerator.generate("   short  ", "q"), NO_INFORMATION);
    }

    #[test]
    fn test_excerpt_truncated() {
        let context: String = (0..1000).map(|i| if i < 800 { 'a' } else { 'z' }).collect();
        let answer = TemplateGenerator.generate(&context, "q");
        assert!(answer.contains(&"a".repeat(800)));
        assert!(!answer.contains('z'));
    }

    #[test]
    fn test_short_context_quoted_whole() {
        let answer = TemplateGenerator.generate("Invoices are due in 30 days.", "q");
        assert!(answer.contains("\"Invoices are due in 30 days....\""));
    }
}
