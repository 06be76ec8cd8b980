use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use geolens_contracts::chat::{ChatMessage, ChatRole, MessageLog};
use geolens_contracts::error::{ContractError, ContractResult};
use geolens_contracts::events::{event_payload, EventWriter};
use serde_json::json;

use super::{lock, SingleFlight, SnapshotHub};
use crate::conversation::ConversationContract;
use crate::transport::Transport;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub messages: Vec<ChatMessage>,
    pub busy: bool,
}

/// Result of one accepted turn. `reply` is what was appended to the log;
/// on failure it is the apology and `error` carries the cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub reply: ChatMessage,
    pub error: Option<ContractError>,
}

struct ChatState {
    log: MessageLog,
    contract: ConversationContract,
}

pub struct ChatSession {
    transport: Arc<dyn Transport>,
    state: Mutex<ChatState>,
    gate: SingleFlight,
    hub: SnapshotHub<ChatSnapshot>,
    events: EventWriter,
}

impl ChatSession {
    /// Opens the log with the model greeting.
    pub fn new(
        transport: Arc<dyn Transport>,
        contract: ConversationContract,
        events: EventWriter,
    ) -> Self {
        let mut log = MessageLog::new();
        log.push(ChatRole::Model, contract.copy().greeting.clone());
        Self {
            transport,
            state: Mutex::new(ChatState { log, contract }),
            gate: SingleFlight::new("chat"),
            hub: SnapshotHub::new(),
            events,
        }
    }

    pub fn model(&self) -> String {
        lock(&self.state).contract.model().to_string()
    }

    /// Swaps the model while keeping the visible log. Resent history starts
    /// over with the new contract.
    pub fn set_contract(&self, contract: ConversationContract) {
        lock(&self.state).contract = contract;
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_held()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.state).log.messages().to_vec()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            messages: self.messages(),
            busy: self.gate.is_held(),
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<Arc<ChatSnapshot>> {
        self.hub.subscribe(self.snapshot())
    }

    /// Sends one user turn.
    ///
    /// Blank input and a turn already in flight are rejected with the log
    /// untouched. Otherwise the user entry is appended at once and exactly
    /// one model entry follows: the reply, the empty-reply fallback, or the
    /// apology.
    pub fn send(&self, text: &str) -> ContractResult<ChatTurn> {
        if text.trim().is_empty() {
            return Err(self.reject(ContractError::rejected("chat message is empty")));
        }
        let flight = self.gate.try_acquire().map_err(|err| self.reject(err))?;

        let request = {
            let mut state = lock(&self.state);
            let request = state.contract.build_request(text)?;
            state.log.push(ChatRole::User, request.prompt.clone());
            request
        };
        self.publish();

        let result = self.transport.call(&request);
        let turn = {
            let mut state = lock(&self.state);
            let (shown, error) = match result {
                Ok(reply) => (state.contract.accept_reply(&request.prompt, &reply.text), None),
                Err(err) => (state.contract.copy().apology.clone(), Some(err)),
            };
            let reply = state.log.push(ChatRole::Model, shown).clone();
            ChatTurn { reply, error }
        };

        match turn.error.as_ref() {
            None => self.events.emit_lossy(
                "chat_turn_completed",
                event_payload(json!({
                    "model": request.model,
                    "history_turns": request.history.len(),
                    "reply_chars": turn.reply.text.chars().count(),
                })),
            ),
            Some(err) => self.events.emit_lossy(
                "chat_turn_failed",
                event_payload(json!({
                    "model": request.model,
                    "kind": err.kind(),
                    "error": err.to_string(),
                })),
            ),
        }

        drop(flight);
        self.publish();
        Ok(turn)
    }

    fn reject(&self, err: ContractError) -> ContractError {
        self.events.emit_lossy(
            "request_rejected",
            event_payload(json!({
                "operation": "chat",
                "kind": err.kind(),
                "reason": err.to_string(),
            })),
        );
        err
    }

    fn publish(&self) {
        self.hub.publish(self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use geolens_contracts::chat::ChatRole;
    use geolens_contracts::error::ContractError;
    use geolens_contracts::events::EventWriter;
    use geolens_contracts::models::ModelRegistry;

    use super::ChatSession;
    use crate::conversation::{ChatCopy, ConversationContract};
    use crate::testing::{text, BlockingTransport, ScriptedTransport};
    use crate::transport::Transport;

    fn session(transport: Arc<dyn Transport>, language: &str) -> ChatSession {
        let registry = ModelRegistry::new(None);
        ChatSession::new(
            transport,
            ConversationContract::new(registry.get("gemini-2.5-flash").unwrap(), language),
            EventWriter::disabled(),
        )
    }

    #[test]
    fn log_opens_with_greeting() {
        let chat = session(Arc::new(ScriptedTransport::new(Vec::new())), "Azerbaijani");
        let messages = chat.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::Model);
        assert!(messages[0].text.starts_with("Salam!"));
    }

    #[test]
    fn salam_adds_user_entry_then_exactly_one_reply() -> anyhow::Result<()> {
        let chat = session(
            Arc::new(ScriptedTransport::new(vec![text("Salam! Necə kömək edə bilərəm?")])),
            "Azerbaijani",
        );
        let updates = chat.subscribe();

        let turn = chat.send("Salam")?;
        assert!(turn.error.is_none());

        let snapshots: Vec<_> = updates.try_iter().collect();
        let pending = snapshots
            .iter()
            .find(|snapshot| snapshot.busy)
            .expect("pending snapshot published");
        assert_eq!(pending.messages.len(), 2);
        assert_eq!(pending.messages[1].role, ChatRole::User);
        assert_eq!(pending.messages[1].text, "Salam");

        let messages = chat.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, ChatRole::Model);
        assert_eq!(messages[2].text, "Salam! Necə kömək edə bilərəm?");
        Ok(())
    }

    #[test]
    fn failures_append_the_apology() -> anyhow::Result<()> {
        let chat = session(
            Arc::new(ScriptedTransport::new(vec![Err(ContractError::transport("offline"))])),
            "Azerbaijani",
        );
        let turn = chat.send("Bazalt nədir?")?;
        assert_eq!(turn.error.map(|err| err.kind()), Some("transport"));
        assert_eq!(turn.reply.text, ChatCopy::for_language("Azerbaijani").apology);
        assert_eq!(chat.messages().len(), 3);
        Ok(())
    }

    #[test]
    fn blank_input_is_a_noop() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let chat = session(transport.clone(), "English");
        assert_eq!(chat.send("   \n").unwrap_err().kind(), "rejected");
        assert_eq!(chat.messages().len(), 1);
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn n_turns_give_at_least_two_n_entries_in_order() -> anyhow::Result<()> {
        let chat = session(
            Arc::new(ScriptedTransport::new(vec![
                text("one"),
                Err(ContractError::decode("garbled")),
                text(""),
            ])),
            "English",
        );
        for message in ["first", "second", "third"] {
            chat.send(message)?;
        }
        let messages = chat.messages();
        assert!(messages.len() >= 6);
        assert!(messages
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
        let copy = ChatCopy::for_language("English");
        assert_eq!(messages[6].text, copy.empty_reply);
        assert_eq!(messages[4].text, copy.apology);
        Ok(())
    }

    #[test]
    fn empty_reply_is_shown_but_not_resent() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new(vec![text("  "), text("Slate splits.")]));
        let chat = session(transport.clone(), "Azerbaijani");

        let turn = chat.send("Şist nədir?")?;
        assert!(turn.error.is_none());
        assert_eq!(turn.reply.text, ChatCopy::for_language("Azerbaijani").empty_reply);

        chat.send("Bəs slanes?")?;
        let requests = transport.requests();
        assert!(requests[1].history.is_empty());
        assert_eq!(chat.messages().len(), 5);
        Ok(())
    }

    #[test]
    fn second_message_while_pending_is_rejected() -> anyhow::Result<()> {
        let (blocking, entered, release) = BlockingTransport::new("Granite is coarse grained.");
        let chat = Arc::new(session(Arc::new(blocking), "English"));

        let worker = {
            let chat = Arc::clone(&chat);
            thread::spawn(move || chat.send("Tell me about granite"))
        };
        entered.recv()?;
        assert!(chat.is_busy());
        assert_eq!(chat.send("and gneiss?").unwrap_err(), ContractError::Busy("chat"));
        assert_eq!(chat.messages().len(), 2);

        release.send(())?;
        let turn = worker.join().expect("chat thread panicked")?;
        assert_eq!(turn.reply.text, "Granite is coarse grained.");
        assert_eq!(chat.messages().len(), 3);
        Ok(())
    }
}
