//! Message compilers: flatten the sectioned store into the message list
//! sent with the next model call.

use stepwise_core::{ExecutionState, Message};

/// Turns a state into the linear message list for one inference request.
pub trait MessageCompiler: Send + Sync {
    fn compile(&self, state: &ExecutionState) -> Vec<Message>;
}

/// Every section, in store order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllSections;

impl MessageCompiler for AllSections {
    fn compile(&self, state: &ExecutionState) -> Vec<Message> {
        state.store().all_messages()
    }
}

/// Only the named sections, in the given order. Missing sections are
/// skipped; with no names at all the default section is used.
#[derive(Debug, Clone, Default)]
pub struct SelectedSections {
    names: Vec<String>,
}

impl SelectedSections {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl MessageCompiler for SelectedSections {
    fn compile(&self, state: &ExecutionState) -> Vec<Message> {
        if self.names.is_empty() {
            return state.messages().to_vec();
        }
        let store = state.store();
        self.names
            .iter()
            .flat_map(|name| store.messages(name).iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::MessageStore;
    use stepwise_core::state::{BUFFER_SECTION, DEFAULT_SECTION, SYSTEM_SECTION};

    fn state() -> ExecutionState {
        let store = MessageStore::new()
            .with_section(SYSTEM_SECTION, vec![Message::system("rules")])
            .with_section(BUFFER_SECTION, vec![Message::user("old")])
            .with_section(DEFAULT_SECTION, vec![Message::user("now")]);
        ExecutionState::new().with_store(store)
    }

    fn contents(messages: Vec<Message>) -> Vec<String> {
        messages.into_iter().map(|m| m.content).collect()
    }

    #[test]
    fn all_sections_in_store_order() {
        assert_eq!(contents(AllSections.compile(&state())), vec!["rules", "old", "now"]);
    }

    #[test]
    fn selected_sections_follow_given_order_and_skip_missing() {
        let compiler = SelectedSections::new([DEFAULT_SECTION, "missing", SYSTEM_SECTION]);
        assert_eq!(contents(compiler.compile(&state())), vec!["now", "rules"]);
    }

    #[test]
    fn no_names_falls_back_to_default_section() {
        let compiler = SelectedSections::new(Vec::<String>::new());
        assert_eq!(contents(compiler.compile(&state())), vec!["now"]);
    }
}
