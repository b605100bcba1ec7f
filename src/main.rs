use anyhow::{Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use codesmith::config::Config;
use codesmith::generation::GenerationRequest;
use codesmith::http_client::ReqwestHttpClient;
use codesmith::language::detect_language;
use codesmith::learning::{FeedbackLearningEngine, GroupStats};
use codesmith::orchestrator::GenerationOrchestrator;
use codesmith::providers::SystemTimeProvider;
use codesmith::store::{FeedbackStore, JsonStore, NewFeedback, NewOutput, PatternType};
use codesmith::stream::StreamEvent;
use codesmith::transport::ProviderKind;
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn provider_arg() -> Arg {
    Arg::new("provider")
        .long("provider")
        .short('p')
        .help("Backend to use: openai, groq or ollama (defaults to the configured one)")
        .value_parser(|s: &str| s.parse::<ProviderKind>())
}

fn cli() -> Command {
    Command::new("codesmith")
        .about("Generate code from plain-language prompts with OpenAI, Groq or Ollama")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("generate")
                .about("Generate code for a prompt")
                .arg(Arg::new("prompt").help("What the code should do").required(true).num_args(1..))
                .arg(Arg::new("language").long("language").short('l').help("Target language (detected from the prompt if omitted)"))
                .arg(Arg::new("temperature").long("temperature").value_parser(value_parser!(f32)).default_value("0.3"))
                .arg(Arg::new("max-tokens").long("max-tokens").value_parser(value_parser!(u32)).default_value("1000"))
                .arg(Arg::new("model").long("model").short('m').help("Model to use instead of the automatic choice"))
                .arg(provider_arg())
                .arg(Arg::new("stream").long("stream").help("Print code as it is generated").action(ArgAction::SetTrue)),
        )
        .subcommand(
            Command::new("models")
                .about("Probe a backend and list its models")
                .arg(provider_arg()),
        )
        .subcommand(
            Command::new("rate")
                .about("Rate a generated output from 1 to 5")
                .arg(Arg::new("output-id").required(true).value_parser(value_parser!(u64)))
                .arg(Arg::new("rating").required(true).value_parser(value_parser!(u8).range(1..=5)))
                .arg(Arg::new("comments").long("comments").short('c').help("What was good or bad about it")),
        )
        .subcommand(
            Command::new("suggest")
                .about("Show hints learned for a language")
                .arg(Arg::new("language").required(true)),
        )
        .subcommand(Command::new("learn").about("Run a learning cycle over all ratings"))
        .subcommand(
            Command::new("patterns")
                .about("List learned patterns")
                .arg(Arg::new("language").long("language").short('l').help("Only patterns for this language"))
                .arg(
                    Arg::new("type")
                        .long("type")
                        .short('t')
                        .help("Only successful or failed patterns")
                        .value_parser(|s: &str| s.parse::<PatternType>()),
                )
                .arg(Arg::new("json").long("json").help("Print the patterns as JSON").action(ArgAction::SetTrue)),
        )
        .subcommand(
            Command::new("report")
                .about("Show the performance report for the last 30 days")
                .arg(Arg::new("json").long("json").help("Print the report as JSON").action(ArgAction::SetTrue)),
        )
        .subcommand(
            Command::new("detect")
                .about("Guess the language of a prompt")
                .arg(Arg::new("prompt").required(true).num_args(1..)),
        )
        .subcommand(
            Command::new("config")
                .about("Show or change configuration")
                .arg(
                    Arg::new("set-api-key")
                        .long("set-api-key")
                        .help("Store an API key for openai or groq")
                        .value_names(["PROVIDER", "API_KEY"])
                        .num_args(2),
                ),
        )
}

fn joined(matches: &ArgMatches, id: &str) -> String {
    matches
        .get_many::<String>(id)
        .unwrap_or_default()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

fn open_store(config: &Config) -> Result<Arc<JsonStore>> {
    Ok(Arc::new(JsonStore::open(config.resolved_store_path()?)?))
}

fn learning_engine(config: &Config) -> Result<FeedbackLearningEngine> {
    Ok(FeedbackLearningEngine::new(
        open_store(config)?,
        Arc::new(SystemTimeProvider),
        config.learning.clone(),
    ))
}

fn orchestrator(config: &Config) -> GenerationOrchestrator {
    let http = Arc::new(ReqwestHttpClient::new(config.http.timeouts()));
    GenerationOrchestrator::from_config(config, http)
}

async fn generate(config: &Config, matches: &ArgMatches) -> Result<()> {
    let prompt = joined(matches, "prompt");
    let language = matches
        .get_one::<String>("language")
        .cloned()
        .unwrap_or_else(|| detect_language(&prompt).to_string());
    let provider = matches.get_one::<ProviderKind>("provider").copied();
    let model = matches.get_one::<String>("model").cloned();
    info!("Generating {} code with provider {:?}", language, provider);

    let orchestrator = orchestrator(config);

    if matches.get_flag("stream") {
        let mut stream = orchestrator
            .stream_generate(&prompt, &language, model.as_deref(), provider)
            .await;
        let mut stdout = std::io::stdout();
        loop {
            let event = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    stream.cancel();
                    eprintln!("\n⏹️  Cancelled");
                    return Ok(());
                }
                event = stream.next() => event,
            };
            match event {
                Some(StreamEvent::Content(text)) => {
                    print!("{text}");
                    stdout.flush()?;
                }
                Some(StreamEvent::Error(message)) => return Err(anyhow!(message)),
                Some(StreamEvent::Complete) | None => break,
            }
        }
        println!();
        return Ok(());
    }

    let mut request = GenerationRequest::new(prompt.clone(), language.clone())
        .with_temperature(*matches.get_one::<f32>("temperature").unwrap_or(&0.3))
        .with_max_tokens(*matches.get_one::<u32>("max-tokens").unwrap_or(&1000));
    request.model = model;

    let result = orchestrator.generate(&request, provider).await;

    let store = open_store(config)?;
    let output_id = store
        .save_output(NewOutput {
            prompt_text: prompt,
            language,
            model_used: result.model_used.clone(),
            code: result.code.clone(),
            raw_output: result.raw_output.clone(),
            elapsed_ms: result.elapsed_ms,
            success: result.success,
            error: result.error.clone(),
            temperature: request.temperature,
        })
        .await?;

    if !result.success {
        let error = result.error.unwrap_or_else(|| "generation failed".to_string());
        return Err(anyhow!("{error} (output #{output_id})"));
    }

    println!("{}", result.code);
    eprintln!(
        "✅ Output #{} from {} in {}ms. Rate it with: codesmith rate {} <1-5>",
        output_id,
        result.model_used.as_deref().unwrap_or("unknown model"),
        result.elapsed_ms,
        output_id
    );
    Ok(())
}

async fn models(config: &Config, matches: &ArgMatches) -> Result<()> {
    let provider = matches
        .get_one::<ProviderKind>("provider")
        .copied()
        .unwrap_or(config.provider);
    let orchestrator = orchestrator(config);
    let snapshot = orchestrator
        .check_availability(Some(provider))
        .await
        .ok_or_else(|| anyhow!("provider {provider} is not registered"))?;

    if !snapshot.is_available {
        println!("⚠️  {provider} is not available");
        return Ok(());
    }
    println!("✅ {provider} is available with {} models", snapshot.known_models.len());
    for model in &snapshot.known_models {
        println!("  {model}");
    }
    Ok(())
}

async fn rate(config: &Config, matches: &ArgMatches) -> Result<()> {
    let output_id = *matches
        .get_one::<u64>("output-id")
        .ok_or_else(|| anyhow!("output id is required"))?;
    let rating = *matches
        .get_one::<u8>("rating")
        .ok_or_else(|| anyhow!("rating is required"))?;
    let store = open_store(config)?;
    store
        .save_feedback(NewFeedback {
            output_id,
            rating,
            comments: matches.get_one::<String>("comments").cloned(),
        })
        .await?;
    println!("✅ Rated output #{output_id} with {rating}/5");
    Ok(())
}

async fn patterns(config: &Config, matches: &ArgMatches) -> Result<()> {
    let language = matches.get_one::<String>("language").map(String::as_str);
    let pattern_type = matches.get_one::<PatternType>("type").copied();
    let patterns = open_store(config)?.patterns(language, pattern_type).await?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&patterns)?);
        return Ok(());
    }
    if patterns.is_empty() {
        println!("No patterns learned yet. Rate some outputs and run `codesmith learn`.");
        return Ok(());
    }
    for pattern in &patterns {
        println!(
            "#{:<4} {:<10} {:<11} {:.2}/5.0  confidence {:.2}  seen {}x  {}",
            pattern.id,
            pattern.language,
            pattern.pattern_type,
            pattern.avg_rating,
            pattern.confidence_score,
            pattern.occurrence_count,
            pattern.description
        );
    }
    Ok(())
}

fn print_groups(title: &str, groups: &[GroupStats]) {
    if groups.is_empty() {
        return;
    }
    println!("\n{title}:");
    for group in groups {
        println!("  {:<16} {:.2}/5.0 ({} ratings)", group.label, group.avg_rating, group.count);
    }
}

async fn report(config: &Config, matches: &ArgMatches) -> Result<()> {
    let report = learning_engine(config)?.get_performance_report().await?;
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let overall = &report.trends.overall;
    println!("📊 Last {} days", report.trends.window_days);
    println!("   Average Rating: {:.2}/5.0", overall.avg_rating);
    println!("   Total Feedback: {}", overall.total_feedback);
    println!("   Positive: {}", overall.positive_count);
    println!("   Negative: {}", overall.negative_count);
    print_groups("By language", &report.trends.by_language);
    print_groups("By model", &report.trends.by_model);
    print_groups("Needs improvement", &report.needs_improvement);
    println!("\nPatterns learned: {}", report.total_patterns_learned);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();

    if let Some(("config", sub)) = matches.subcommand() {
        if let Some(values) = sub.get_many::<String>("set-api-key") {
            let values: Vec<&String> = values.collect();
            let [provider, api_key] = values.as_slice() else {
                return Err(anyhow!("--set-api-key takes a provider and a key"));
            };
            let provider: ProviderKind = provider.parse().map_err(|e: String| anyhow!(e))?;
            Config::set_api_key(provider, api_key.to_string())?;
            println!("✅ {provider} API key saved successfully");
        } else {
            Config::show_config_info()?;
        }
        return Ok(());
    }

    let config = Config::load()?;
    match matches.subcommand() {
        Some(("generate", sub)) => generate(&config, sub).await,
        Some(("models", sub)) => models(&config, sub).await,
        Some(("rate", sub)) => rate(&config, sub).await,
        Some(("suggest", sub)) => {
            let language = sub
                .get_one::<String>("language")
                .ok_or_else(|| anyhow!("language is required"))?;
            let suggestions = learning_engine(&config)?.get_suggestions(language).await?;
            if suggestions.is_empty() {
                println!("No suggestions for {language} yet. Rate some outputs and run `codesmith learn`.");
            }
            for suggestion in suggestions {
                println!("{suggestion}");
            }
            Ok(())
        }
        Some(("learn", _)) => {
            let cycle = learning_engine(&config)?.run_learning_cycle().await?;
            println!("🧠 Learning cycle complete");
            println!(
                "   Average Rating: {:.2}/5.0 over {} ratings",
                cycle.trends.overall.avg_rating, cycle.trends.overall.total_feedback
            );
            println!(
                "   Candidates: {} successful, {} problematic",
                cycle.update.successful_candidates, cycle.update.failed_candidates
            );
            println!(
                "   Patterns: {} new, {} updated, {} total",
                cycle.update.inserted, cycle.update.updated, cycle.performance.total_patterns_learned
            );
            Ok(())
        }
        Some(("patterns", sub)) => patterns(&config, sub).await,
        Some(("report", sub)) => report(&config, sub).await,
        Some(("detect", sub)) => {
            println!("{}", detect_language(&joined(sub, "prompt")));
            Ok(())
        }
        _ => Ok(()),
    }
}
