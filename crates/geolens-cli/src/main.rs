use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use geolens_contracts::analysis::{InsightResult, RockAnalysis};
use geolens_contracts::chat::{parse_intent, ChatMessage, ChatRole, Intent, CHAT_HELP_COMMANDS};
use geolens_contracts::error::ContractError;
use geolens_contracts::events::EventWriter;
use geolens_engine::{
    Capability, ChatSession, EngineConfig, GeoEngine, IdentifySession, IdentifySnapshot,
    ScanOutcome,
};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(
    name = "geolens",
    version,
    about = "Identify rocks and minerals from photos and talk geology"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session with the identify and chat screens.
    Studio(SessionArgs),
    /// Interactive session that opens on the chat screen.
    Chat(SessionArgs),
    /// Identify one image and exit.
    Identify(IdentifyArgs),
    /// Query grounded insights for a specimen name and exit.
    Insights(InsightsArgs),
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    /// Append developer events as JSON lines to this file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Use the offline transport instead of the Gemini API.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    max_image_dim: Option<u32>,
    #[arg(long)]
    structured_model: Option<String>,
    #[arg(long)]
    grounded_model: Option<String>,
    #[arg(long)]
    chat_model: Option<String>,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Parser)]
struct IdentifyArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    no_insights: bool,
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Parser)]
struct InsightsArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    common: CommonArgs,
}

impl CommonArgs {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::from_env();
        if self.dryrun {
            config.transport = "dryrun".to_string();
        }
        if let Some(language) = non_empty(self.language.as_deref()) {
            config.language = language;
        }
        if let Some(dim) = self.max_image_dim.filter(|dim| *dim > 0) {
            config.max_image_dim = Some(dim);
        }
        if let Some(model) = non_empty(self.structured_model.as_deref()) {
            config.structured_model = Some(model);
        }
        if let Some(model) = non_empty(self.grounded_model.as_deref()) {
            config.grounded_model = Some(model);
        }
        if let Some(model) = non_empty(self.chat_model.as_deref()) {
            config.chat_model = Some(model);
        }
        config
    }

    fn build_engine(&self) -> Result<GeoEngine> {
        let events = EventWriter::for_session(self.events.clone());
        GeoEngine::new(self.engine_config(), events)
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("geolens error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Studio(args) => run_studio(args, Screen::Identify),
        Command::Chat(args) => run_studio(args, Screen::Chat),
        Command::Identify(args) => run_identify(args),
        Command::Insights(args) => run_insights(args),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Identify,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopControl {
    Continue,
    Quit,
}

/// Interactive state: one engine, one session per screen.
struct Studio {
    engine: GeoEngine,
    identify: IdentifySession,
    chat: ChatSession,
    screen: Screen,
}

impl Studio {
    fn new(engine: GeoEngine, screen: Screen) -> Self {
        let identify = engine.identify_session();
        let chat = engine.chat_session();
        Self {
            engine,
            identify,
            chat,
            screen,
        }
    }

    fn dispatch(&mut self, intent: &Intent, out: &mut dyn Write) -> Result<LoopControl> {
        match intent.action.as_str() {
            "noop" => {}
            "quit" => return Ok(LoopControl::Quit),
            "help" => {
                writeln!(out, "Commands: {}", CHAT_HELP_COMMANDS.join(" "))?;
            }
            "show_identify" => {
                self.screen = Screen::Identify;
                render_snapshot(out, &self.identify.snapshot())?;
            }
            "show_chat" | "show_history" => {
                self.screen = Screen::Chat;
                for message in self.chat.messages() {
                    render_chat_message(out, &message)?;
                }
            }
            "select_image" => {
                self.screen = Screen::Identify;
                match intent.arg("path") {
                    Some(path) => {
                        self.select(Path::new(path), out)?;
                    }
                    None => writeln!(out, "/select requires a path")?,
                }
            }
            "scan" => {
                self.screen = Screen::Identify;
                if let Some(path) = intent.arg("path") {
                    if !self.select(Path::new(path), out)? {
                        return Ok(LoopControl::Continue);
                    }
                }
                self.scan(out)?;
            }
            "discard_image" => {
                self.identify.discard();
                writeln!(out, "Image discarded.")?;
            }
            "refresh_insights" => match self.identify.refresh_insights() {
                Ok(insights) => render_insights(out, &insights)?,
                Err(err) => report_failure(out, "Insights unavailable", &err)?,
            },
            "set_structured_model" => {
                self.set_model(Capability::Structured, intent.arg("value"), out)?;
            }
            "set_grounded_model" => {
                self.set_model(Capability::Grounded, intent.arg("value"), out)?;
            }
            "set_chat_model" => {
                self.set_model(Capability::Conversational, intent.arg("value"), out)?;
            }
            "set_language" => match intent.arg("value") {
                Some(language) => {
                    self.engine.set_language(language)?;
                    self.refresh_contracts();
                    writeln!(out, "Language set to {language}")?;
                }
                None => writeln!(
                    out,
                    "Language is {}",
                    self.engine.config().language
                )?,
            },
            "message" => {
                let text = intent.message.as_deref().unwrap_or_default();
                if self.screen == Screen::Chat {
                    self.send_chat(text, out)?;
                } else {
                    writeln!(out, "Plain text goes to the geologist; switch with /chat.")?;
                }
            }
            _ => {
                let command = intent.arg("command").unwrap_or_default();
                writeln!(out, "Unknown command: /{command}. Type /help for commands.")?;
            }
        }
        Ok(LoopControl::Continue)
    }

    /// Returns whether the image was selected.
    fn select(&mut self, path: &Path, out: &mut dyn Write) -> Result<bool> {
        let payload = match self.engine.load_image(path) {
            Ok(payload) => payload,
            Err(err) => {
                writeln!(out, "Could not read image: {err:#}")?;
                return Ok(false);
            }
        };
        match self.identify.select_image(payload) {
            Ok(snapshot) => {
                writeln!(
                    out,
                    "Selected {} ({}, {} bytes)",
                    path.display(),
                    snapshot.image_mime.as_deref().unwrap_or("unknown"),
                    snapshot.image_bytes
                )?;
                Ok(true)
            }
            Err(err) => {
                report_failure(out, "Could not select image", &err)?;
                Ok(false)
            }
        }
    }

    fn scan(&mut self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "Analysing specimen...")?;
        match self.identify.scan() {
            Ok(outcome) => render_outcome(out, &outcome)?,
            Err(err) => report_failure(out, "Identification failed", &err)?,
        }
        Ok(())
    }

    fn send_chat(&mut self, text: &str, out: &mut dyn Write) -> Result<()> {
        match self.chat.send(text) {
            Ok(turn) => {
                render_chat_message(out, &turn.reply)?;
                if let Some(err) = turn.error {
                    eprintln!("geolens: chat turn failed: {err}");
                }
            }
            Err(err) => report_failure(out, "Message not sent", &err)?,
        }
        Ok(())
    }

    fn set_model(
        &mut self,
        capability: Capability,
        requested: Option<&str>,
        out: &mut dyn Write,
    ) -> Result<()> {
        let label = capability_label(capability);
        let Some(requested) = requested else {
            let current = &self.engine.selection(capability).model.name;
            writeln!(out, "{label} model is {current}")?;
            return Ok(());
        };
        let selection = match self.engine.select_model(capability, requested) {
            Ok(selection) => selection.clone(),
            Err(err) => {
                writeln!(out, "Could not set {label} model: {err:#}")?;
                return Ok(());
            }
        };
        self.refresh_contracts();
        writeln!(out, "{label} model set to {}", selection.model.name)?;
        if let Some(reason) = selection.fallback_reason {
            writeln!(out, "  {reason}")?;
        }
        Ok(())
    }

    fn refresh_contracts(&mut self) {
        self.identify
            .set_identification_contract(self.engine.identification_contract());
        self.identify
            .set_insight_contract(self.engine.insight_contract());
        self.chat.set_contract(self.engine.conversation_contract());
    }
}

fn run_studio(args: SessionArgs, screen: Screen) -> Result<i32> {
    let engine = args.common.build_engine()?;
    let mut studio = Studio::new(engine, screen);
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    println!(
        "GeoLens started ({} transport). Type /help for commands.",
        studio.engine.transport_name()
    );
    let opening = if screen == Screen::Chat {
        "/chat"
    } else {
        "/identify"
    };
    studio.dispatch(&parse_intent(opening), &mut stdout)?;

    let mut line = String::new();
    let mut input = stdin.lock();
    loop {
        print!("{}> ", screen_prompt(studio.screen));
        stdout.flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if studio.dispatch(&intent, &mut stdout)? == LoopControl::Quit {
            break;
        }
    }
    Ok(0)
}

fn run_identify(args: IdentifyArgs) -> Result<i32> {
    let engine = args.common.build_engine()?;
    let session = engine.identify_session();
    session.set_auto_insights(!args.no_insights);

    let payload = engine.load_image(&args.image)?;
    session.select_image(payload)?;
    let outcome = session
        .scan()
        .with_context(|| format!("identification of {} failed", args.image.display()))?;

    let mut stdout = io::stdout();
    if args.json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&outcome_json(&outcome))?)?;
    } else {
        render_outcome(&mut stdout, &outcome)?;
    }
    Ok(0)
}

fn run_insights(args: InsightsArgs) -> Result<i32> {
    let engine = args.common.build_engine()?;
    let insights = engine
        .fetch_insights(&args.name)
        .with_context(|| format!("insight query for '{}' failed", args.name.trim()))?;

    let mut stdout = io::stdout();
    if args.json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&insights)?)?;
    } else {
        render_insights(&mut stdout, &insights)?;
    }
    Ok(0)
}

fn outcome_json(outcome: &ScanOutcome) -> Value {
    json!({
        "analysis": outcome.analysis,
        "insights": outcome.insights,
        "insight_error": outcome.insight_error.as_ref().map(|err| err.kind()),
    })
}

fn render_snapshot(out: &mut dyn Write, snapshot: &IdentifySnapshot) -> io::Result<()> {
    match snapshot.image_digest.as_deref() {
        Some(digest) => writeln!(
            out,
            "Image: {} bytes, {} (sha256 {})",
            snapshot.image_bytes,
            snapshot.image_mime.as_deref().unwrap_or("unknown"),
            &digest[..digest.len().min(12)]
        )?,
        None => writeln!(out, "No image selected. Use /select <path> or /scan <path>.")?,
    }
    if let Some(analysis) = snapshot.analysis.as_ref() {
        render_analysis(out, analysis)?;
    }
    if let Some(insights) = snapshot.insights.as_ref() {
        render_insights(out, insights)?;
    }
    if snapshot.last_error.is_some() {
        writeln!(out, "The last request failed. Please try again.")?;
    }
    Ok(())
}

fn render_outcome(out: &mut dyn Write, outcome: &ScanOutcome) -> io::Result<()> {
    render_analysis(out, &outcome.analysis)?;
    if let Some(insights) = outcome.insights.as_ref() {
        render_insights(out, insights)?;
    }
    if let Some(err) = outcome.insight_error.as_ref() {
        report_failure(out, "Insights unavailable", err)?;
    }
    Ok(())
}

/// Upstream failures get a fixed line on `out`; their cause only goes to
/// stderr. Local rejections are shown as they are.
fn report_failure(out: &mut dyn Write, summary: &str, err: &ContractError) -> io::Result<()> {
    if err.is_upstream() {
        eprintln!("geolens: {summary}: {err}");
        writeln!(out, "{summary}. Please try again.")
    } else {
        writeln!(out, "{summary}: {err}")
    }
}

fn render_analysis(out: &mut dyn Write, analysis: &RockAnalysis) -> io::Result<()> {
    writeln!(out, "{}", analysis.name)?;
    for (field, value) in analysis.fields().iter().skip(1) {
        writeln!(out, "  {:<19} {}", field_label(field), value)?;
    }
    Ok(())
}

fn render_insights(out: &mut dyn Write, insights: &InsightResult) -> io::Result<()> {
    writeln!(out, "Insights:")?;
    for line in insights.text.lines() {
        writeln!(out, "  {line}")?;
    }
    if !insights.sources.is_empty() {
        writeln!(out, "Sources:")?;
        for (index, source) in insights.sources.iter().enumerate() {
            writeln!(out, "  [{}] {} <{}>", index + 1, source.title, source.uri)?;
        }
    }
    Ok(())
}

fn render_chat_message(out: &mut dyn Write, message: &ChatMessage) -> io::Result<()> {
    let speaker = match message.role {
        ChatRole::User => "you",
        ChatRole::Model => "geologist",
    };
    writeln!(out, "{speaker}: {}", message.text)
}

fn field_label(field: &str) -> &'static str {
    match field {
        "name" => "Name",
        "category" => "Category",
        "chemicalFormula" => "Chemical formula",
        "hardness" => "Hardness (Mohs)",
        "description" => "Description",
        "geologicalContext" => "Geological context",
        "rarity" => "Rarity",
        "funFact" => "Fun fact",
        _ => "Field",
    }
}

fn capability_label(capability: Capability) -> &'static str {
    match capability {
        Capability::Structured => "Structured",
        Capability::Grounded => "Grounded",
        Capability::Conversational => "Chat",
    }
}

fn screen_prompt(screen: Screen) -> &'static str {
    match screen {
        Screen::Identify => "identify",
        Screen::Chat => "chat",
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
