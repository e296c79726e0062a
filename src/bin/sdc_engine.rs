use clap::{Parser, Subcommand};
use octofhir_sdc_engine::enable_when::assign_populated_answers;
use octofhir_sdc_engine::*;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sdc-engine")]
#[command(about = "Inspect SDC questionnaire declarations and conditional state")]
#[command(version)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the declarations extracted from a questionnaire
    Inspect {
        /// Path to the Questionnaire file
        #[arg(short, long)]
        questionnaire: PathBuf,
        /// Print only per-engine counts
        #[arg(long)]
        summary: bool,
    },
    /// Compute declarative enableWhen states for a response
    EnableWhen {
        /// Path to the Questionnaire file
        #[arg(short, long)]
        questionnaire: PathBuf,
        /// Path to the QuestionnaireResponse file
        #[arg(short, long)]
        response: PathBuf,
    },
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    tracing::debug!(
        terminology_server_url = %config.terminology_server_url,
        max_calculation_iterations = config.max_calculation_iterations,
        "Loaded configuration"
    );

    match cli.command {
        Commands::Inspect {
            questionnaire,
            summary,
        } => inspect(&questionnaire, summary)?,
        Commands::EnableWhen {
            questionnaire,
            response,
        } => enable_when(&questionnaire, &response)?,
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        EngineError::invalid_document(format!("{}: {e}", path.display()))
    })
}

fn inspect(path: &Path, summary: bool) -> Result<()> {
    let questionnaire: Questionnaire = read_json(path)?;
    let model = QuestionnaireModel::from_questionnaire(&questionnaire);

    let output = if summary {
        json!({
            "items": model.item_types.len(),
            "variables": {
                "fhirPath": model.variables.fhir_path_variables.values().map(Vec::len).sum::<usize>(),
                "xFhirQuery": model.variables.x_fhir_query_variables.len(),
            },
            "enableWhenItems": {
                "single": model.enable_when_items.single_items.len(),
                "repeat": model.enable_when_items.repeat_items.len(),
            },
            "enableWhenExpressions": {
                "single": model.enable_when_expressions.single_expressions.len(),
                "repeat": model.enable_when_expressions.repeat_expressions.len(),
            },
            "calculatedExpressions": model.calculated_expressions.len(),
            "targetConstraints": model.target_constraints.len(),
            "answerOptionsToggleExpressions": model.answer_options_toggle_expressions.len(),
            "processedValueSets": model.processed_value_sets.len(),
        })
    } else {
        serde_json::to_value(&model)?
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn enable_when(questionnaire_path: &Path, response_path: &Path) -> Result<()> {
    let questionnaire: Questionnaire = read_json(questionnaire_path)?;
    let response: QuestionnaireResponse = read_json(response_path)?;

    let mut model = QuestionnaireModel::from_questionnaire(&questionnaire);
    let linked_questions = assign_populated_answers(&mut model.enable_when_items, &response);

    let single: serde_json::Map<String, serde_json::Value> = model
        .enable_when_items
        .single_items
        .iter()
        .map(|(link_id, item)| (link_id.clone(), json!(item.is_enabled)))
        .collect();
    let repeat: serde_json::Map<String, serde_json::Value> = model
        .enable_when_items
        .repeat_items
        .iter()
        .map(|(link_id, item)| {
            (
                link_id.clone(),
                json!({
                    "parentLinkId": item.parent_link_id,
                    "enabledIndexes": item.enabled_indexes,
                }),
            )
        })
        .collect();

    let output = json!({
        "single": single,
        "repeat": repeat,
        "linkedQuestions": linked_questions,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
