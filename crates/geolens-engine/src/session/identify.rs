use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use geolens_contracts::analysis::{ImagePayload, InsightResult, RockAnalysis};
use geolens_contracts::error::{ContractError, ContractResult};
use geolens_contracts::events::{event_payload, EventWriter};
use serde_json::json;

use super::{lock, SingleFlight, SnapshotHub};
use crate::identify::IdentificationContract;
use crate::image_input::image_digest;
use crate::insight::InsightContract;
use crate::transport::Transport;

/// What the identify screen renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifySnapshot {
    pub image_digest: Option<String>,
    pub image_mime: Option<String>,
    pub image_bytes: usize,
    pub analysis: Option<RockAnalysis>,
    pub insights: Option<InsightResult>,
    pub busy: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub analysis: RockAnalysis,
    pub insights: Option<InsightResult>,
    pub insight_error: Option<ContractError>,
}

struct IdentifyState {
    image: Option<ImagePayload>,
    image_digest: Option<String>,
    analysis: Option<RockAnalysis>,
    insights: Option<InsightResult>,
    last_error: Option<String>,
    // Bumped on every selection change; late results for an older
    // generation are discarded.
    generation: u64,
    identification: IdentificationContract,
    insight: InsightContract,
    auto_insights: bool,
}

pub struct IdentifySession {
    transport: Arc<dyn Transport>,
    state: Mutex<IdentifyState>,
    gate: SingleFlight,
    hub: SnapshotHub<IdentifySnapshot>,
    events: EventWriter,
}

impl IdentifySession {
    pub fn new(
        transport: Arc<dyn Transport>,
        identification: IdentificationContract,
        insight: InsightContract,
        events: EventWriter,
    ) -> Self {
        Self {
            transport,
            state: Mutex::new(IdentifyState {
                image: None,
                image_digest: None,
                analysis: None,
                insights: None,
                last_error: None,
                generation: 0,
                identification,
                insight,
                auto_insights: true,
            }),
            gate: SingleFlight::new("identify"),
            hub: SnapshotHub::new(),
            events,
        }
    }

    pub fn set_identification_contract(&self, contract: IdentificationContract) {
        lock(&self.state).identification = contract;
    }

    pub fn set_insight_contract(&self, contract: InsightContract) {
        lock(&self.state).insight = contract;
    }

    /// Whether `scan` follows a successful identification with insights.
    pub fn set_auto_insights(&self, enabled: bool) {
        lock(&self.state).auto_insights = enabled;
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_held()
    }

    pub fn snapshot(&self) -> IdentifySnapshot {
        let state = lock(&self.state);
        IdentifySnapshot {
            image_digest: state.image_digest.clone(),
            image_mime: state.image.as_ref().map(|image| image.mime_type.clone()),
            image_bytes: state.image.as_ref().map(ImagePayload::len).unwrap_or(0),
            analysis: state.analysis.clone(),
            insights: state.insights.clone(),
            busy: self.gate.is_held(),
            last_error: state.last_error.clone(),
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<Arc<IdentifySnapshot>> {
        self.hub.subscribe(self.snapshot())
    }

    /// Replaces the current image and clears any previous result.
    pub fn select_image(&self, image: ImagePayload) -> ContractResult<IdentifySnapshot> {
        if image.is_empty() {
            return Err(self.reject(
                "select_image",
                ContractError::rejected("selected image is empty"),
            ));
        }
        let digest = image_digest(&image);
        self.events.emit_lossy(
            "image_selected",
            event_payload(json!({
                "image_digest": digest,
                "mime_type": image.mime_type,
                "bytes": image.len(),
            })),
        );
        {
            let mut state = lock(&self.state);
            state.generation += 1;
            state.image = Some(image);
            state.image_digest = Some(digest);
            state.analysis = None;
            state.insights = None;
            state.last_error = None;
        }
        Ok(self.publish())
    }

    pub fn discard(&self) -> IdentifySnapshot {
        {
            let mut state = lock(&self.state);
            state.generation += 1;
            state.image = None;
            state.image_digest = None;
            state.analysis = None;
            state.insights = None;
            state.last_error = None;
        }
        self.publish()
    }

    /// Identifies the selected image, then fetches insights for it.
    ///
    /// An identification failure leaves no analysis. An insight failure is
    /// reported in the outcome and leaves the analysis in place.
    pub fn scan(&self) -> ContractResult<ScanOutcome> {
        let flight = self
            .gate
            .try_acquire()
            .map_err(|err| self.reject("scan", err))?;
        let outcome = self.run_scan();
        drop(flight);
        self.publish();
        outcome
    }

    pub fn refresh_insights(&self) -> ContractResult<InsightResult> {
        let flight = self
            .gate
            .try_acquire()
            .map_err(|err| self.reject("refresh_insights", err))?;
        let target = {
            let mut state = lock(&self.state);
            let name = state.analysis.as_ref().map(|analysis| analysis.name.clone());
            if name.is_some() {
                state.insights = None;
                state.last_error = None;
            }
            name.map(|name| (name, state.generation))
        };
        let outcome = match target {
            Some((name, generation)) => {
                self.publish();
                self.run_insights(&name, generation)
            }
            None => Err(self.reject(
                "refresh_insights",
                ContractError::rejected("no analysis to query insights for"),
            )),
        };
        drop(flight);
        self.publish();
        outcome
    }

    fn run_scan(&self) -> ContractResult<ScanOutcome> {
        let (contract, image, generation, auto_insights) = {
            let mut state = lock(&self.state);
            let Some(image) = state.image.clone() else {
                return Err(self.reject("scan", ContractError::rejected("no image selected")));
            };
            state.analysis = None;
            state.insights = None;
            state.last_error = None;
            (
                state.identification.clone(),
                image,
                state.generation,
                state.auto_insights,
            )
        };
        self.publish();

        self.events.emit_lossy(
            "identify_started",
            event_payload(json!({
                "model": contract.model(),
                "image_digest": image_digest(&image),
                "mime_type": image.mime_type,
            })),
        );
        let analysis = match contract.identify(self.transport.as_ref(), &image) {
            Ok(analysis) => analysis,
            Err(err) => {
                self.events.emit_lossy(
                    "identify_failed",
                    event_payload(json!({
                        "model": contract.model(),
                        "kind": err.kind(),
                        "error": err.to_string(),
                    })),
                );
                let mut state = lock(&self.state);
                if state.generation == generation {
                    state.last_error = Some(err.to_string());
                }
                return Err(err);
            }
        };
        self.events.emit_lossy(
            "identify_completed",
            event_payload(json!({
                "model": contract.model(),
                "name": analysis.name,
                "category": analysis.category,
            })),
        );

        {
            let mut state = lock(&self.state);
            if state.generation != generation {
                return Err(ContractError::rejected(
                    "image selection changed during identification",
                ));
            }
            state.analysis = Some(analysis.clone());
        }
        if !auto_insights {
            return Ok(ScanOutcome {
                analysis,
                insights: None,
                insight_error: None,
            });
        }

        self.publish();
        let (insights, insight_error) = match self.run_insights(&analysis.name, generation) {
            Ok(result) => (Some(result), None),
            Err(err) => (None, Some(err)),
        };
        Ok(ScanOutcome {
            analysis,
            insights,
            insight_error,
        })
    }

    fn run_insights(&self, name: &str, generation: u64) -> ContractResult<InsightResult> {
        let contract = lock(&self.state).insight.clone();
        match contract.fetch(self.transport.as_ref(), name) {
            Ok(result) => {
                self.events.emit_lossy(
                    "insights_completed",
                    event_payload(json!({
                        "model": contract.model(),
                        "name": name,
                        "sources": result.sources.len(),
                    })),
                );
                let mut state = lock(&self.state);
                if state.generation == generation {
                    state.insights = Some(result.clone());
                }
                Ok(result)
            }
            Err(err) => {
                self.events.emit_lossy(
                    "insights_failed",
                    event_payload(json!({
                        "model": contract.model(),
                        "name": name,
                        "kind": err.kind(),
                        "error": err.to_string(),
                    })),
                );
                let mut state = lock(&self.state);
                if state.generation == generation {
                    state.last_error = Some(err.to_string());
                }
                Err(err)
            }
        }
    }

    fn reject(&self, operation: &str, err: ContractError) -> ContractError {
        self.events.emit_lossy(
            "request_rejected",
            event_payload(json!({
                "operation": operation,
                "kind": err.kind(),
                "reason": err.to_string(),
            })),
        );
        err
    }

    fn publish(&self) -> IdentifySnapshot {
        let snapshot = self.snapshot();
        self.hub.publish(snapshot.clone());
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::thread;

    use geolens_contracts::analysis::{ImagePayload, UNRESOLVED_SOURCE_URI};
    use geolens_contracts::error::{ContractError, ContractResult};
    use geolens_contracts::events::EventWriter;
    use geolens_contracts::models::ModelRegistry;
    use serde_json::Value;

    use super::IdentifySession;
    use crate::identify::IdentificationContract;
    use crate::insight::InsightContract;
    use crate::testing::{cited, quartz_json, text, BlockingTransport, ScriptedTransport};
    use crate::transport::{Capability, RawReply, Transport};

    fn session(transport: Arc<dyn Transport>, events: EventWriter) -> IdentifySession {
        let registry = ModelRegistry::new(None);
        IdentifySession::new(
            transport,
            IdentificationContract::new(registry.get("gemini-2.5-flash-lite").unwrap(), "English"),
            InsightContract::new(registry.get("gemini-flash-lite-latest").unwrap(), "English"),
            events,
        )
    }

    fn sample() -> ImagePayload {
        ImagePayload::new(b"sample.jpg".to_vec(), "image/jpeg")
    }

    fn quartz_script(insights: ContractResult<RawReply>) -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::new(vec![text(&quartz_json()), insights]))
    }

    #[test]
    fn quartz_scan_shows_analysis_then_insights() -> anyhow::Result<()> {
        let transport = quartz_script(cited(
            "Quartz is mined in Brazil.",
            &[
                (Some("USGS"), Some("https://usgs.gov/quartz")),
                (Some("Dangling"), None),
            ],
        ));
        let session = session(transport.clone(), EventWriter::disabled());
        session.select_image(sample())?;

        let outcome = session.scan()?;
        assert_eq!(outcome.analysis.name, "Quartz");
        assert_eq!(outcome.analysis.chemical_formula, "SiO2");
        assert!(outcome.insight_error.is_none());

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].capability, Capability::Structured);
        assert_eq!(requests[1].capability, Capability::Grounded);
        assert!(requests[1].prompt.contains("about Quartz."));

        let snapshot = session.snapshot();
        assert!(!snapshot.busy);
        assert_eq!(snapshot.analysis.as_ref().map(|a| a.hardness.as_str()), Some("7"));
        let sources = snapshot.insights.map(|insights| insights.sources).unwrap_or_default();
        assert_eq!(sources.len(), 1);
        assert!(sources.iter().all(|source| source.uri != UNRESOLVED_SOURCE_URI));
        Ok(())
    }

    #[test]
    fn network_failure_leaves_no_analysis_and_scan_available() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(ContractError::transport("connection reset")),
            text(&quartz_json()),
            text("Found worldwide."),
        ]));
        let session = session(transport, EventWriter::disabled());
        session.select_image(sample())?;

        let err = session.scan().unwrap_err();
        assert_eq!(err.kind(), "transport");
        let snapshot = session.snapshot();
        assert!(snapshot.analysis.is_none());
        assert!(snapshot.last_error.is_some());
        assert!(!snapshot.busy);

        let retry = session.scan()?;
        assert_eq!(retry.analysis.name, "Quartz");
        assert!(session.snapshot().last_error.is_none());
        Ok(())
    }

    #[test]
    fn malformed_reply_exposes_no_analysis() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new(vec![text("{\"name\":\"Quartz\"}")]));
        let session = session(transport, EventWriter::disabled());
        session.select_image(sample())?;
        assert_eq!(session.scan().unwrap_err().kind(), "decode");
        assert!(session.snapshot().analysis.is_none());
        Ok(())
    }

    #[test]
    fn insight_failure_keeps_analysis() -> anyhow::Result<()> {
        let transport = quartz_script(Err(ContractError::transport("quota exceeded")));
        let session = session(transport, EventWriter::disabled());
        session.select_image(sample())?;

        let outcome = session.scan()?;
        assert_eq!(outcome.insights, None);
        assert_eq!(outcome.insight_error.map(|err| err.kind()), Some("transport"));
        let snapshot = session.snapshot();
        assert!(snapshot.analysis.is_some());
        assert!(snapshot.insights.is_none());
        Ok(())
    }

    #[test]
    fn auto_insights_can_be_turned_off_and_refreshed_later() -> anyhow::Result<()> {
        let transport = quartz_script(text("Used in electronics."));
        let session = session(transport.clone(), EventWriter::disabled());
        session.set_auto_insights(false);
        session.select_image(sample())?;

        session.scan()?;
        assert_eq!(transport.requests().len(), 1);
        assert!(session.snapshot().insights.is_none());

        let insights = session.refresh_insights()?;
        assert_eq!(insights.text, "Used in electronics.");
        assert!(session.snapshot().insights.is_some());
        Ok(())
    }

    #[test]
    fn preconditions_are_rejected_without_calls() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let session = session(transport.clone(), EventWriter::disabled());
        assert_eq!(session.scan().unwrap_err().kind(), "rejected");
        assert_eq!(session.refresh_insights().unwrap_err().kind(), "rejected");
        assert_eq!(
            session
                .select_image(ImagePayload::new(Vec::new(), "image/png"))
                .unwrap_err()
                .kind(),
            "rejected"
        );
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn selecting_or_discarding_clears_results() -> anyhow::Result<()> {
        let transport = quartz_script(text("Common everywhere."));
        let session = session(transport, EventWriter::disabled());
        session.select_image(sample())?;
        session.scan()?;

        let reselected = session.select_image(ImagePayload::new(vec![9, 9, 9], "image/png"))?;
        assert!(reselected.analysis.is_none());
        assert!(reselected.insights.is_none());
        assert_eq!(reselected.image_bytes, 3);

        let discarded = session.discard();
        assert_eq!(discarded.image_digest, None);
        assert_eq!(discarded.image_bytes, 0);
        Ok(())
    }

    #[test]
    fn second_scan_while_pending_is_busy() -> anyhow::Result<()> {
        let (blocking, entered, release) = BlockingTransport::new(&quartz_json());
        let session = Arc::new(session(Arc::new(blocking), EventWriter::disabled()));
        session.set_auto_insights(false);
        session.select_image(sample())?;

        let worker = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.scan())
        };
        entered.recv()?;
        assert!(session.is_busy());
        assert_eq!(session.scan().unwrap_err(), ContractError::Busy("identify"));

        release.send(())?;
        let outcome = worker.join().expect("scan thread panicked")?;
        assert_eq!(outcome.analysis.name, "Quartz");
        assert!(!session.is_busy());
        Ok(())
    }

    #[test]
    fn subscribers_see_busy_then_result() -> anyhow::Result<()> {
        let transport = quartz_script(text("Found in Brazil."));
        let session = session(transport, EventWriter::disabled());
        let updates = session.subscribe();
        session.select_image(sample())?;
        session.scan()?;

        let snapshots: Vec<_> = updates.try_iter().collect();
        assert!(snapshots.first().map(|s| s.image_digest.is_none()).unwrap_or(false));
        assert!(snapshots.iter().any(|s| s.busy && s.analysis.is_none()));
        let last = snapshots.last().expect("snapshots published");
        assert!(!last.busy);
        assert!(last.insights.is_some());
        Ok(())
    }

    #[test]
    fn scan_writes_developer_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let transport = quartz_script(text("Found in Brazil."));
        let session = session(transport, EventWriter::new(Some(path.clone()), "session-1"));
        session.select_image(sample())?;
        session.scan()?;

        let types: Vec<String> = fs::read_to_string(&path)?
            .lines()
            .map(|line| serde_json::from_str::<Value>(line))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            types,
            vec![
                "image_selected",
                "identify_started",
                "identify_completed",
                "insights_completed",
            ]
        );
        Ok(())
    }
}
