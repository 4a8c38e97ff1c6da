//! # RLM CLI
//!
//! Command-line interface for the recursive language model runtime.
//!
//! Usage:
//!   rlm run --document <file|-> <query>
//!   rlm needle [--secret <value>]
//!   rlm doctor [--skip-inference]
//!   rlm exec --program <file> --document <file>
//!   rlm check --program <file> [--disasm]
//!   rlm schema
//!
//! Examples:
//!   rlm run -d report.txt "What is the contract end date?"
//!   OLLAMA_HOST=http://ollama_server:11434 rlm doctor
//!   rlm --backend openai --model huggingface/smollm:1.7b needle

use clap::{Parser, Subcommand};
use rlm_agent::{CancellationToken, FailureKind, Orchestrator, RlmConfig, RunReport, RunResult};
use rlm_vm::{
    compile, AnyProvider, Error, ExecutionResult, Interpreter, LlmProvider, ProviderConfig,
    ProviderType, Result, SandboxLimits, DEFAULT_OLLAMA_HOST,
};
use std::io::Read;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rlm")]
#[command(author, version, about = "RLM - answer questions over documents too large for one context")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend type: ollama or openai (any OpenAI-compatible API)
    #[arg(long, env = "RLM_BACKEND", default_value = "ollama", global = true)]
    backend: String,

    /// Ollama daemon address
    #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_OLLAMA_HOST, global = true)]
    host: String,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "CLOUD_BASE_URL", default_value = "https://openrouter.ai/api/v1", global = true)]
    base_url: String,

    /// API key for the OpenAI-compatible API
    #[arg(long, env = "CLOUD_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Model for both controller and worker
    #[arg(short, long, env = "MODEL_NAME", global = true)]
    model: Option<String>,

    /// Separate model for worker (ask_llm) calls
    #[arg(long, global = true)]
    worker_model: Option<String>,

    /// Fragment size the controller is told to use
    #[arg(long, default_value_t = rlm_agent::DEFAULT_CHUNK_SIZE, global = true)]
    chunk_size: usize,

    /// HTTP timeout in seconds for each backend call
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Instruction budget for the generated program
    #[arg(long, global = true)]
    max_steps: Option<usize>,

    /// Print the full run report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode - only show the final answer
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over a document
    Run {
        /// Document file, or - for stdin
        #[arg(short, long)]
        document: String,

        /// The question to answer
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
    },
    /// Needle-in-a-haystack demo
    Needle {
        /// Value hidden in the middle of the noise
        #[arg(long, default_value = "IMT_2026")]
        secret: String,
    },
    /// Check backend reachability, model availability and the sandbox
    Doctor {
        /// Skip the inference smoke test
        #[arg(long)]
        skip_inference: bool,
    },
    /// Run a hand-written program against a document with the live worker
    Exec {
        #[arg(short, long)]
        program: String,

        /// Document file, or - for stdin
        #[arg(short, long)]
        document: String,
    },
    /// Compile a program without running it
    Check {
        #[arg(short, long)]
        program: String,

        /// Print the compiled bytecode
        #[arg(long)]
        disasm: bool,
    },
    /// Show the controller system prompt (with --json, the sandbox schema)
    Schema,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let code = match dispatch(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            2
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn,rlm_agent=info",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Commands::Run { document, query } => {
            let document = load_document(document)?;
            let orchestrator = build_orchestrator(cli)?;
            let report = run_cancellable(&orchestrator, document, &query.join(" ")).await;
            Ok(print_report(&report, cli.json, cli.quiet))
        }
        Commands::Needle { secret } => {
            let document = needle_document(secret);
            let query = "Search the document for the SECRET value.";
            if !cli.quiet {
                println!("Needle demo: {} characters, secret '{}'\n", document.chars().count(), secret);
            }
            let orchestrator = build_orchestrator(cli)?;
            let report = run_cancellable(&orchestrator, document, query).await;
            let code = print_report(&report, cli.json, cli.quiet);
            if !cli.quiet && !cli.json {
                let verdict = if report.result.value() == Some(secret.as_str()) { "PASS" } else { "FAIL" };
                println!("\nNeedle check: {}", verdict);
            }
            Ok(code)
        }
        Commands::Doctor { skip_inference } => doctor(cli, *skip_inference).await,
        Commands::Exec { program, document } => {
            let program = std::fs::read_to_string(program)
                .map_err(|e| Error::from(e).with_context("path", program.clone()))?;
            let document = load_document(document)?;
            let orchestrator = build_orchestrator(cli)?;
            let cancel = cancel_on_ctrl_c();
            let report = orchestrator.run_program(document, &program, &cancel).await;
            Ok(print_report(&report, cli.json, cli.quiet))
        }
        Commands::Check { program, disasm } => {
            let source = std::fs::read_to_string(program)
                .map_err(|e| Error::from(e).with_context("path", program.clone()))?;
            match compile(&source) {
                Ok(compiled) => {
                    if *disasm {
                        print!("{}", compiled.disassemble());
                    }
                    if !cli.quiet {
                        println!(
                            "OK: {} instructions, locals: [{}]",
                            compiled.code.len(),
                            compiled.locals.join(", ")
                        );
                    }
                    Ok(0)
                }
                Err(e) => {
                    eprintln!("Compile error: {}", e);
                    Ok(1)
                }
            }
        }
        Commands::Schema => {
            let config = build_config(cli)?;
            if cli.json {
                println!("{}", rlm_vm::SandboxSchema::with_limits(config.limits).to_json());
            } else {
                let provider = AnyProvider::from_config(build_provider_config(cli)?)?;
                let orchestrator = Orchestrator::new(provider, config)?;
                println!("{}", orchestrator.system_prompt(0));
            }
            Ok(0)
        }
    }
}

fn build_provider_config(cli: &Cli) -> Result<ProviderConfig> {
    let backend: ProviderType = cli.backend.parse()?;
    let mut config = match backend {
        ProviderType::Ollama => ProviderConfig::ollama(&cli.host),
        ProviderType::OpenAI => {
            let key = cli.api_key.clone().unwrap_or_default();
            if key.is_empty() {
                tracing::warn!("no API key set (CLOUD_API_KEY); requests will be unauthenticated");
            }
            ProviderConfig::openai_compatible(&cli.base_url, key)
        }
    };
    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    if let Some(secs) = cli.timeout {
        config = config.with_timeout(secs);
    }
    Ok(config)
}

fn build_config(cli: &Cli) -> Result<RlmConfig> {
    let mut limits = SandboxLimits::default();
    if let Some(steps) = cli.max_steps {
        limits.max_steps = steps;
    }
    let mut config = RlmConfig::new().with_chunk_size(cli.chunk_size).with_limits(limits);
    if let Some(model) = &cli.worker_model {
        config = config.with_worker_model(model.clone());
    }
    config.validate()?;
    Ok(config)
}

fn build_orchestrator(cli: &Cli) -> Result<Orchestrator<AnyProvider>> {
    let provider = AnyProvider::from_config(build_provider_config(cli)?)?;
    tracing::info!(
        backend = provider.name(),
        endpoint = %provider.endpoint(),
        model = provider.default_model(),
        "backend selected"
    );
    Orchestrator::new(provider, build_config(cli)?)
}

fn load_document(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).map_err(|e| Error::from(e).with_context("path", path))
}

fn needle_document(secret: &str) -> String {
    format!("{}SECRET: {}{}", "noise ".repeat(2000), secret, " noise ".repeat(2000))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling run");
            trigger.cancel();
        }
    });
    cancel
}

async fn run_cancellable(orchestrator: &Orchestrator<AnyProvider>, document: String, query: &str) -> RunReport {
    let cancel = cancel_on_ctrl_c();
    orchestrator.run_with(document, query, &cancel).await
}

/// Print a report; returns the process exit code
fn print_report(report: &RunReport, json: bool, quiet: bool) -> i32 {
    let code = if report.result.is_success() { 0 } else { 1 };

    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error serializing report: {}", e),
        }
        return code;
    }

    if !quiet {
        if let Some(program) = &report.program {
            println!("--- PROGRAM ---\n{}\n", program);
        }
        if !report.output.is_empty() {
            println!("--- PROGRAM OUTPUT ---");
            for line in &report.output {
                println!("{}", line);
            }
            if report.dropped_output > 0 {
                println!("... ({} more lines)", report.dropped_output);
            }
            println!();
        }
    }

    match &report.result {
        RunResult::Succeeded { value } => {
            if !quiet {
                println!("--- FINAL RESULT ---\n");
            }
            println!("{}", value.as_deref().unwrap_or("(no result)"));
        }
        RunResult::Failed { kind, detail, program_text } => {
            eprintln!("Run failed: {}", kind);
            eprintln!("{}", detail);
            if *kind == FailureKind::ExecutionError && quiet {
                if let Some(program) = program_text {
                    eprintln!("\nProgram:\n{}", program);
                }
            }
        }
    }

    if !quiet {
        let d = &report.delegations;
        println!(
            "\n{} delegations ({} found, {} not found, {} inconclusive), {} steps, {} tokens, {:.2}s",
            d.calls,
            d.found,
            d.not_found,
            d.inconclusive,
            report.steps,
            report.usage.total_tokens,
            report.elapsed_ms as f64 / 1000.0
        );
    }
    code
}

// ============================================================================
// Doctor
// ============================================================================

const SCOPE_CHECK_PROGRAM: &str = "result = document.split(':')[1].strip()";
const SCOPE_CHECK_DOCUMENT: &str = "SECRET: 123";

async fn doctor(cli: &Cli, skip_inference: bool) -> Result<i32> {
    let provider = AnyProvider::from_config(build_provider_config(cli)?)?;
    let model = provider.default_model().to_string();
    let total = if skip_inference { 3 } else { 4 };
    let mut step = 0;
    let mut failed = false;

    println!("--- RLM System Check ---");
    println!("Backend: {} at {}", provider.name(), provider.endpoint());

    step += 1;
    let models = match provider.list_models().await {
        Ok(models) => {
            println!("[{}/{}] Connection: OK ({} models)", step, total, models.len());
            models
        }
        Err(e) => {
            println!("[{}/{}] Connection: FAILED ({})", step, total, e);
            return Ok(1);
        }
    };

    step += 1;
    if model_available(&model, &models) {
        println!("[{}/{}] Model '{}': OK", step, total, model);
    } else {
        failed = true;
        println!("[{}/{}] Model '{}': NOT FOUND", step, total, model);
        if provider.name() == "ollama" {
            println!("      Run: ollama pull {}", model);
        }
    }

    if !skip_inference {
        step += 1;
        match provider.chat(vec![rlm_vm::ChatMessage::user("Say \"RLM_READY\"")]).await {
            Ok(reply) if reply.contains("RLM_READY") => {
                println!("[{}/{}] Inference: OK", step, total);
            }
            Ok(reply) => {
                failed = true;
                println!("[{}/{}] Inference: ERROR (got: {})", step, total, reply.trim());
            }
            Err(e) => {
                failed = true;
                println!("[{}/{}] Inference: FAILED ({})", step, total, e);
            }
        }
    }

    step += 1;
    match scope_check() {
        Ok(value) if value == "123" => println!("[{}/{}] Sandbox scope: OK", step, total),
        Ok(value) => {
            failed = true;
            println!("[{}/{}] Sandbox scope: FAILED (got {})", step, total, value);
        }
        Err(e) => {
            failed = true;
            println!("[{}/{}] Sandbox scope: CRASHED ({})", step, total, e);
        }
    }

    Ok(if failed { 1 } else { 0 })
}

/// Hosted models (ids containing "cloud") are not listed locally
fn model_available(model: &str, models: &[String]) -> bool {
    model.contains("cloud")
        || models
            .iter()
            .any(|m| m == model || m.strip_suffix(":latest") == Some(model))
}

fn scope_check() -> Result<String> {
    let program = compile(SCOPE_CHECK_PROGRAM)?;
    let mut interp = Interpreter::new(program, SCOPE_CHECK_DOCUMENT);
    match interp.run()? {
        ExecutionResult::Complete(value) => Ok(value.to_answer().unwrap_or_default()),
        ExecutionResult::NeedsDelegation(_) => Err(Error::unexpected("scope check should not delegate")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "rlm", "--backend", "openai", "--model", "smollm", "run", "-d", "doc.txt", "What", "is", "it?",
        ])
        .unwrap();
        assert_eq!(cli.backend, "openai");
        assert_eq!(cli.model.as_deref(), Some("smollm"));
        match cli.command {
            Commands::Run { document, query } => {
                assert_eq!(document, "doc.txt");
                assert_eq!(query.join(" "), "What is it?");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_provider_config_from_flags() {
        let cli = Cli::try_parse_from([
            "rlm", "--backend", "ollama", "--host", "http://ollama_server:11434", "--timeout", "30", "doctor",
        ])
        .unwrap();
        let config = build_provider_config(&cli).unwrap();
        assert_eq!(config.provider_type, ProviderType::Ollama);
        assert_eq!(config.endpoint(), "http://ollama_server:11434");
        assert_eq!(config.timeout_secs, Some(30));

        let cli = Cli::try_parse_from(["rlm", "--backend", "bogus", "schema"]).unwrap();
        assert!(build_provider_config(&cli).is_err());
    }

    #[test]
    fn test_build_config() {
        let cli = Cli::try_parse_from([
            "rlm", "--chunk-size", "2000", "--max-steps", "500", "--worker-model", "tiny", "needle",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.chunk_size, 2000);
        assert_eq!(config.limits.max_steps, 500);
        assert_eq!(config.worker_model.as_deref(), Some("tiny"));

        let cli = Cli::try_parse_from(["rlm", "--chunk-size", "0", "needle"]).unwrap();
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_load_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "SECRET: 123").unwrap();
        let path = file.path().to_string_lossy().to_string();
        assert_eq!(load_document(&path).unwrap(), "SECRET: 123");

        let missing = tempfile::tempdir().unwrap().path().join("missing.txt");
        let err = load_document(&missing.to_string_lossy()).unwrap_err();
        assert_eq!(err.kind(), rlm_vm::ErrorKind::FileNotFound);
    }

    #[test]
    fn test_needle_document() {
        let doc = needle_document("IMT_2026");
        assert!(doc.contains("SECRET: IMT_2026"));
        assert_eq!(doc.len(), 6 * 2000 + "SECRET: IMT_2026".len() + 7 * 2000);
    }

    #[test]
    fn test_model_available() {
        let models = vec!["qwen3:4b".to_string(), "smollm:latest".to_string()];
        assert!(model_available("qwen3:4b", &models));
        assert!(model_available("smollm", &models));
        assert!(model_available("qwen3-coder:480b-cloud", &models));
        assert!(!model_available("llama3", &models));
    }

    #[test]
    fn test_scope_check() {
        assert_eq!(scope_check().unwrap(), "123");
    }
}
