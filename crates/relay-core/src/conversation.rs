//! Append-only conversation history.

use crate::types::{Author, Turn};

/// Ordered turn history for one conversation. Turns can only be appended; an
/// optional system instruction is seeded at construction and stays first.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Start a conversation seeded with a system instruction.
    pub fn with_system_instruction(instruction: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(instruction)],
        }
    }

    /// Add a turn to the end of the history.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// The full ordered history, for passing to the model.
    pub fn snapshot(&self) -> &[Turn] {
        &self.turns
    }

    /// The seeded system instruction, if any.
    pub fn system_instruction(&self) -> Option<&Turn> {
        self.turns.first().filter(|t| t.author == Author::System)
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TurnOrigin;

    #[test]
    fn test_seeded_instruction_stays_first() {
        let mut conversation = Conversation::with_system_instruction("be brief");
        conversation.append(Turn::human("hi"));
        conversation.append(Turn::model("hello"));

        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.system_instruction().unwrap().text(), "be brief");
        assert_eq!(conversation.snapshot()[0].author, Author::System);
    }

    #[test]
    fn test_append_preserves_order() {
        let mut conversation = Conversation::new();
        conversation.append(Turn::human("one"));
        conversation.append(Turn::tool_result("two"));
        conversation.append(Turn::model("three"));

        let texts: Vec<_> = conversation.snapshot().iter().map(Turn::text).collect();
        assert_eq!(texts, vec!["one", "Tool result: two", "three"]);
        assert_eq!(
            conversation.snapshot()[1].author,
            Author::User(TurnOrigin::ToolResult)
        );
        assert!(conversation.system_instruction().is_none());
    }
}
