use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Mutex;

use geolens_contracts::error::{ContractError, ContractResult};
use serde_json::json;

use crate::transport::{RawCitation, RawReply, Transport, TransportRequest};

/// Replays queued replies in order and records every request.
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<ContractResult<RawReply>>>,
    seen: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<ContractResult<RawReply>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn call(&self, request: &TransportRequest) -> ContractResult<RawReply> {
        self.seen.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ContractError::transport("script exhausted")))
    }
}

/// Parks every call until the test sends on the release channel.
pub(crate) struct BlockingTransport {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
    reply: String,
}

impl BlockingTransport {
    pub(crate) fn new(reply: &str) -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let transport = Self {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            reply: reply.to_string(),
        };
        (transport, entered_rx, release_tx)
    }
}

impl Transport for BlockingTransport {
    fn name(&self) -> &str {
        "blocking"
    }

    fn call(&self, _request: &TransportRequest) -> ContractResult<RawReply> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        text(&self.reply)
    }
}

pub(crate) fn text(value: &str) -> ContractResult<RawReply> {
    Ok(RawReply {
        text: value.to_string(),
        finish_reason: Some("STOP".to_string()),
        ..RawReply::default()
    })
}

pub(crate) fn cited(value: &str, citations: &[(Option<&str>, Option<&str>)]) -> ContractResult<RawReply> {
    Ok(RawReply {
        text: value.to_string(),
        citations: citations
            .iter()
            .map(|(title, uri)| RawCitation {
                title: title.map(str::to_string),
                uri: uri.map(str::to_string),
            })
            .collect(),
        ..RawReply::default()
    })
}

pub(crate) fn quartz_json() -> String {
    json!({
        "name": "Quartz",
        "category": "Mineral",
        "chemicalFormula": "SiO2",
        "hardness": "7",
        "description": "Glassy hexagonal prisms.",
        "geologicalContext": "Granites and hydrothermal veins.",
        "rarity": "Common",
        "funFact": "Quartz crystals keep time in watches."
    })
    .to_string()
}
