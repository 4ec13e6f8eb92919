//! System prompt assembly.

use std::fmt::{self, Debug};
use std::sync::Arc;

/// Separates persona documents from each other and from the context.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

const CONTEXT_HEADER: &str = "## Past chats in similar situations. \
Use them to keep a consistent tone and style:";

const USAGE_RULES: &str = "## How to use the background above
- It is your background knowledge and persona. Blend it into replies naturally, never recite it as a list.
- Match the tone and style of the past chats, but never copy them word for word.
- Answer accurately when asked about these topics. If you don't know, say you don't know.
- Keep your chat style: short, casual, quick.";

/// The persona text, loaded once and shared read-only by every request.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Persona(Arc<str>);

impl Persona {
    /// Creates a persona from its full text.
    #[inline]
    pub fn new<S: Into<Arc<str>>>(text: S) -> Self {
        Self(text.into())
    }

    /// Creates a persona by joining documents in order. Blank documents
    /// are skipped and the others are trimmed.
    pub fn from_documents<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sections: Vec<String> = documents
            .into_iter()
            .map(|doc| doc.as_ref().trim().to_owned())
            .filter(|doc| !doc.is_empty())
            .collect();
        Self::new(sections.join(SECTION_SEPARATOR))
    }

    /// Returns the persona text.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Persona")
            .field(&format_args!("{} bytes", self.0.len()))
            .finish()
    }
}

/// Builds the system turn from the persona and the retrieved context.
///
/// An empty `context` yields exactly the persona-only prompt.
pub fn assemble_system_prompt(persona: &Persona, context: &str) -> String {
    let mut prompt = String::from(persona.as_str());
    if !context.is_empty() {
        prompt.push_str(SECTION_SEPARATOR);
        prompt.push_str(CONTEXT_HEADER);
        prompt.push_str("\n\n");
        prompt.push_str(context);
    }
    prompt.push_str("\n\n");
    prompt.push_str(USAGE_RULES);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_from_documents() {
        let persona = Persona::from_documents([
            "  I like tea.\n",
            "",
            "   ",
            "I live in Tokyo.",
        ]);
        assert_eq!(persona.as_str(), "I like tea.\n\n---\n\nI live in Tokyo.");
    }

    #[test]
    fn test_prompt_without_context() {
        let persona = Persona::new("I like tea.");
        let prompt = assemble_system_prompt(&persona, "");
        assert!(prompt.starts_with("I like tea.\n\n## How to use"));
        assert!(!prompt.contains(CONTEXT_HEADER));
        assert!(prompt.ends_with("short, casual, quick."));
    }

    #[test]
    fn test_prompt_with_context() {
        let persona = Persona::new("I like tea.");
        let prompt = assemble_system_prompt(&persona, "Q: tea?\nA: always");
        let expected_head = format!(
            "I like tea.\n\n---\n\n{CONTEXT_HEADER}\n\nQ: tea?\nA: always\n\n## How to use"
        );
        assert!(prompt.starts_with(&expected_head));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let persona = Persona::new("p");
        assert_eq!(
            assemble_system_prompt(&persona, "c"),
            assemble_system_prompt(&persona, "c")
        );
    }
}
