//! Persona CLI - Command-line interface for Persona Flux
//!
//! Commands:
//! - replay: Replay recorded sessions and print what the tracker sent
//! - classify: Replay a session and print the final persona report
//! - validate: Validate recorded session schema
//! - doctor: Diagnose configuration and environment
//! - schema: Print the recorded session schema

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use persona_flux::encoder::Envelope;
use persona_flux::pipeline::{ReplayProcessor, ReplayReport};
use persona_flux::schema::{RecordedSession, SessionReader, SCHEMA_VERSION};
use persona_flux::snapshot::SnapshotStore;
use persona_flux::{PersonaConfig, PersonaError, PERSONA_FLUX_VERSION, PRODUCER_NAME};

/// Persona - On-device visitor persona classifier
#[derive(Parser)]
#[command(name = "persona")]
#[command(author = "Synheart AI Inc")]
#[command(version = PERSONA_FLUX_VERSION)]
#[command(about = "Replay recorded page sessions through the persona classifier", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded sessions in order, sharing local storage between them
    Replay {
        /// Session files (use - for stdin)
        #[arg(short, long, num_args = 1.., required = true)]
        input: Vec<PathBuf>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "auto")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Emit full replay reports instead of the sent envelopes
        #[arg(long)]
        reports: bool,

        /// Classifier config JSON (overrides the sessions' own)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load local storage from file before the first session
        #[arg(long)]
        load_storage: Option<PathBuf>,

        /// Save local storage to file after the last session
        #[arg(long)]
        save_storage: Option<PathBuf>,
    },

    /// Replay a session and print the final persona, scores and features
    Classify {
        /// Session file (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "auto")]
        input_format: InputFormat,

        /// Classifier config JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate recorded session schema
    Validate {
        /// Session file (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "auto")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check a classifier config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check a saved storage file
        #[arg(long)]
        storage: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// Detect from content
    Auto,
    /// One JSON document
    Json,
    /// Header line followed by one event per line
    Ndjson,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), PersonaCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            input_format,
            output_format,
            reports,
            config,
            load_storage,
            save_storage,
        } => cmd_replay(
            &input,
            &output,
            input_format,
            output_format,
            reports,
            config.as_deref(),
            load_storage.as_deref(),
            save_storage.as_deref(),
        ),

        Commands::Classify {
            input,
            input_format,
            config,
            json,
        } => cmd_classify(&input, input_format, config.as_deref(), json),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor {
            config,
            storage,
            json,
        } => cmd_doctor(config.as_deref(), storage.as_deref(), json),

        Commands::Schema { json_schema } => cmd_schema(json_schema),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_replay(
    inputs: &[PathBuf],
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    reports: bool,
    config: Option<&Path>,
    load_storage: Option<&Path>,
    save_storage: Option<&Path>,
) -> Result<(), PersonaCliError> {
    let mut processor = processor_for(config)?;

    if let Some(path) = load_storage {
        processor.load_storage(&fs::read_to_string(path)?)?;
    }

    let mut replayed: Vec<ReplayReport> = Vec::new();
    for input in inputs {
        let session = read_session(input, input_format)?;
        replayed.push(processor.replay_session(&session)?);
    }

    if let Some(path) = save_storage {
        fs::write(path, processor.save_storage()?)?;
    }

    let output_data = if reports {
        format_output(&replayed, output_format)?
    } else {
        let envelopes: Vec<Envelope> = replayed.into_iter().flat_map(|r| r.envelopes).collect();
        if envelopes.is_empty() {
            return Err(PersonaCliError::NothingSent);
        }
        format_output(&envelopes, output_format)?
    };

    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_classify(
    input: &Path,
    input_format: InputFormat,
    config: Option<&Path>,
    json: bool,
) -> Result<(), PersonaCliError> {
    let session = read_session(input, input_format)?;
    let report = processor_for(config)?.replay_session(&session)?;

    let summary = ClassifyReport {
        persona: report.persona.persona.to_string(),
        confidence: report.persona.confidence,
        scores: serde_json::to_value(report.persona.scores)?,
        features: serde_json::to_value(&report.features)?,
        persona_events: report.persona_events.len(),
        envelopes: report.envelopes.len(),
        applied_variants: report.applied_variants,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let scores = &report.persona.scores;
        println!("Persona Report");
        println!("==============");
        println!("Persona:    {}", summary.persona);
        println!("Confidence: {}", summary.confidence);
        println!(
            "Scores:     value {:.1}, solution {:.1}, trust {:.1}, intent {:.1}",
            scores.value, scores.solution, scores.trust, scores.intent
        );
        println!("Engagement: {:.1}", report.persona.features.engagement_score);
        println!("Events:     {} persona, {} sent", summary.persona_events, summary.envelopes);
        if !summary.applied_variants.is_empty() {
            println!("Variants:   {}", summary.applied_variants.join(", "));
        }
    }

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), PersonaCliError> {
    let session = read_session(input, input_format)?;
    let results = SessionReader::validate(&session);

    let invalid_events = results.iter().filter(|r| r.index.is_some()).count();
    let report = ValidationReport {
        schema_version: session.schema_version.clone(),
        total_events: session.events.len(),
        valid_events: session.events.len() - invalid_events,
        invalid_events,
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                kind: r.kind.map(str::to_string),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Schema:         {}", report.schema_version);
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                match err.index {
                    Some(index) => println!(
                        "  - Event {} (index {}): {}",
                        err.kind.as_deref().unwrap_or("unknown"),
                        index,
                        err.error
                    ),
                    None => println!("  - Header: {}", err.error),
                }
            }
        }
    }

    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(PersonaCliError::ValidationFailed(report.errors.len()))
    }
}

fn cmd_doctor(config: Option<&Path>, storage: Option<&Path>, json: bool) -> Result<(), PersonaCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck::ok("version", format!("Persona Flux version {}", PERSONA_FLUX_VERSION)),
        DoctorCheck::ok("schema_version", format!("Input schema: {}", SCHEMA_VERSION)),
    ];

    if let Some(path) = config {
        checks.push(match fs::read_to_string(path) {
            Ok(content) => match PersonaConfig::from_json(&content) {
                Ok(config) => DoctorCheck::ok(
                    "config",
                    format!(
                        "Config valid (emit every {} ms, snapshot key {})",
                        config.update_interval_ms, config.storage_key
                    ),
                ),
                Err(e) => DoctorCheck::error("config", format!("Invalid config: {}", e)),
            },
            Err(e) => DoctorCheck::error("config", format!("Cannot read config file: {}", e)),
        });
    }

    if let Some(path) = storage {
        checks.push(check_storage(path));
    }

    checks.push(if atty::is(atty::Stream::Stdin) {
        DoctorCheck::ok("stdin", "stdin is a TTY (interactive mode)".to_string())
    } else {
        DoctorCheck::ok("stdin", "stdin is a pipe (ready for `-i -`)".to_string())
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: PERSONA_FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Persona Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(PersonaCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_storage(path: &Path) -> DoctorCheck {
    if !path.exists() {
        return DoctorCheck {
            name: "storage".to_string(),
            status: CheckStatus::Warning,
            message: "Storage file does not exist".to_string(),
        };
    }

    let mut processor = ReplayProcessor::new();
    let loaded = fs::read_to_string(path)
        .map_err(|e| PersonaError::StorageError(e.to_string()))
        .and_then(|content| processor.load_storage(&content));
    if let Err(e) = loaded {
        return DoctorCheck::error("storage", format!("Invalid storage file: {}", e));
    }

    let key = PersonaConfig::default().storage_key;
    match SnapshotStore::new(key.as_str()).load(processor.storage()) {
        Some(snapshot) => DoctorCheck::ok(
            "storage",
            format!(
                "Returning visitor snapshot: {} ({}% confidence)",
                snapshot.persona, snapshot.confidence
            ),
        ),
        None => DoctorCheck {
            name: "storage".to_string(),
            status: CheckStatus::Warning,
            message: format!("No usable snapshot under {}", key),
        },
    }
}

fn cmd_schema(json_schema: bool) -> Result<(), PersonaCliError> {
    if json_schema {
        println!("{}", get_input_json_schema());
        return Ok(());
    }

    println!("Input Schema: {}", SCHEMA_VERSION);
    println!();
    println!("A recorded session is a header object plus timed events. As NDJSON the");
    println!("header sits on the first line and each event on its own line.");
    println!();
    println!("Header:");
    println!("  - schemaVersion, startedAt (RFC 3339), utcOffsetMinutes");
    println!("  - attributes: script-tag attributes (data-website-id, data-domains, ...)");
    println!("  - context: {{ url, referrer, title, language, screenWidth, screenHeight, doNotTrack }}");
    println!("  - personaConfig, document, collect, variants, storage, durationMs (optional)");
    println!();
    println!("Events carry `at` (ms after startedAt) and `type`:");
    println!("  - scroll {{ scrollY, viewportHeight, documentHeight }}");
    println!("  - click {{ element, actionable }}, submit {{ action, id, className }}");
    println!("  - mouse_move, hover_start, hover_end");
    println!("  - navigate {{ url, kind: push|replace }}, visibility {{ state: visible|hidden }}");
    println!("  - track {{ name?, data? }}, identify {{ id?, data? }}");
    println!("  - conversion {{ eventType, value?, data? }}");
    println!("  - switch_content {{ selector, content, contentType? }}");
    println!("  - tick, shutdown");

    Ok(())
}

// Helper functions

fn processor_for(config: Option<&Path>) -> Result<ReplayProcessor, PersonaCliError> {
    Ok(match config {
        Some(path) => ReplayProcessor::with_config(PersonaConfig::from_json(&fs::read_to_string(path)?)?),
        None => ReplayProcessor::new(),
    })
}

fn read_session(input: &Path, format: InputFormat) -> Result<RecordedSession, PersonaCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    if input_data.trim().is_empty() {
        return Err(PersonaCliError::EmptyInput);
    }

    let session = match format {
        InputFormat::Auto => SessionReader::parse(&input_data)?,
        InputFormat::Json => SessionReader::parse_json(&input_data)?,
        InputFormat::Ndjson => SessionReader::parse_ndjson(&input_data)?,
    };
    Ok(session)
}

fn format_output<T: serde::Serialize>(records: &[T], format: OutputFormat) -> Result<String, PersonaCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)?),
    }
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://synheart.ai/schemas/persona.session.v1.json",
        "title": "persona.session.v1",
        "description": "Recorded page session for persona replay",
        "type": "object",
        "required": ["schemaVersion", "startedAt", "context"],
        "properties": {
            "schemaVersion": { "type": "string", "const": SCHEMA_VERSION },
            "startedAt": { "type": "string", "format": "date-time" },
            "utcOffsetMinutes": { "type": "integer" },
            "attributes": { "type": "object", "additionalProperties": { "type": "string" } },
            "context": {
                "type": "object",
                "required": ["url", "screenWidth", "screenHeight"],
                "properties": {
                    "url": { "type": "string" },
                    "referrer": { "type": "string" },
                    "title": { "type": "string" },
                    "language": { "type": "string" },
                    "screenWidth": { "type": "integer" },
                    "screenHeight": { "type": "integer" },
                    "doNotTrack": { "type": ["string", "null"] }
                }
            },
            "personaConfig": { "type": "object" },
            "document": { "type": "object" },
            "collect": {
                "type": "object",
                "properties": {
                    "disabled": { "type": "boolean" },
                    "cache": { "type": "string" },
                    "sessionId": { "type": "string" }
                }
            },
            "variants": { "type": "object" },
            "storage": { "type": "object", "additionalProperties": { "type": "string" } },
            "durationMs": { "type": "integer", "minimum": 0 },
            "events": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["at", "type"],
                    "properties": {
                        "at": { "type": "integer", "minimum": 0 },
                        "type": {
                            "type": "string",
                            "enum": [
                                "scroll", "click", "mouse_move", "hover_start", "hover_end",
                                "submit", "navigate", "visibility", "track", "identify",
                                "conversion", "switch_content", "tick", "shutdown"
                            ]
                        }
                    }
                }
            }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum PersonaCliError {
    Io(io::Error),
    Persona(PersonaError),
    Json(serde_json::Error),
    EmptyInput,
    NothingSent,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for PersonaCliError {
    fn from(e: io::Error) -> Self {
        PersonaCliError::Io(e)
    }
}

impl From<PersonaError> for PersonaCliError {
    fn from(e: PersonaError) -> Self {
        PersonaCliError::Persona(e)
    }
}

impl From<serde_json::Error> for PersonaCliError {
    fn from(e: serde_json::Error) -> Self {
        PersonaCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PersonaCliError> for CliError {
    fn from(e: PersonaCliError) -> Self {
        match e {
            PersonaCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PersonaCliError::Persona(e @ PersonaError::InvalidEvent { .. }) => CliError {
                code: "VALIDATION_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'persona validate' for details".to_string()),
            },
            PersonaCliError::Persona(e @ PersonaError::InvalidConfig(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'persona doctor --config <file>'".to_string()),
            },
            PersonaCliError::Persona(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(format!("Ensure input matches the {} schema", SCHEMA_VERSION)),
            },
            PersonaCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PersonaCliError::EmptyInput => CliError {
                code: "EMPTY_INPUT".to_string(),
                message: "No session found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            PersonaCliError::NothingSent => CliError {
                code: "NOTHING_SENT".to_string(),
                message: "The tracker sent no envelopes".to_string(),
                hint: Some(
                    "Check data-website-id, domains and do-not-track, or pass --reports".to_string(),
                ),
            },
            PersonaCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} validation errors", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            PersonaCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ClassifyReport {
    persona: String,
    confidence: u8,
    scores: serde_json::Value,
    features: serde_json::Value,
    persona_events: usize,
    envelopes: usize,
    applied_variants: Vec<String>,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    schema_version: String,
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: Option<usize>,
    kind: Option<String>,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

impl DoctorCheck {
    fn ok(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message,
        }
    }

    fn error(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message,
        }
    }
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
