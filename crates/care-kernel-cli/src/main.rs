use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use care_kernel_core::{
    assemble_views, filter_concerns, rank_cares, rank_tie_breakers, recommend, CareCandidate,
    ConcernIndices, ConcernQuery, Preference, RecordStore, StoreData,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "ck")]
#[command(about = "Care Kernel CLI")]
struct Cli {
    /// Path to the JSON store file (concerns, cares, variants, bundles).
    #[arg(long)]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Filter concerns and assemble domain-scoped care views.
    Query(QueryArgs),
    /// Score and rank externally supplied care candidates.
    Rank(RankArgs),
    /// Full pipeline: filter, assemble, and rank each concern's options.
    Recommend(RecommendArgs),
}

#[derive(Debug, Args)]
struct QueryArgs {
    #[arg(long = "trait")]
    traits: Vec<String>,

    #[arg(long, default_value = "")]
    domain: String,

    #[arg(long = "situation")]
    situations: Vec<String>,
}

impl QueryArgs {
    fn to_query(&self) -> ConcernQuery {
        ConcernQuery {
            traits: self.traits.clone(),
            domain: self.domain.clone(),
            situations: self.situations.clone(),
        }
    }
}

#[derive(Debug, Args)]
struct RankArgs {
    /// JSON file holding an array of care candidates.
    #[arg(long)]
    candidates: PathBuf,

    /// Optional JSON preference file (weight overrides and hard limits).
    #[arg(long)]
    preference: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RecommendArgs {
    #[command(flatten)]
    query: QueryArgs,

    #[arg(long)]
    preference: Option<PathBuf>,
}

fn load_store(path: &Path) -> Result<RecordStore> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read store file {}", path.display()))?;
    let data: StoreData = serde_json::from_str(&raw)
        .with_context(|| format!("store file {} is not valid store JSON", path.display()))?;
    Ok(RecordStore::new(data))
}

fn load_preference(path: Option<&Path>) -> Result<Preference> {
    let Some(path) = path else {
        return Ok(Preference::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read preference file {}", path.display()))?;
    let preference: Preference = serde_json::from_str(&raw)
        .with_context(|| format!("preference file {} is not valid JSON", path.display()))?;
    Ok(preference)
}

fn load_candidates(path: &Path) -> Result<Vec<CareCandidate>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read candidates file {}", path.display()))?;
    let candidates: Vec<CareCandidate> = serde_json::from_str(&raw)
        .with_context(|| format!("candidates file {} is not valid JSON", path.display()))?;
    Ok(candidates)
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn print_value<T: Serialize>(value: &T) -> Result<()> {
    let value = serde_json::to_value(value)?;
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Query(args) => {
            let store = load_store(&cli.store)?;
            let indices = ConcernIndices::build(&store);
            let query = args.to_query();
            let matched = filter_concerns(&store, &indices, &query);
            let views = assemble_views(&store, &matched, &query.domain);
            print_value(&serde_json::json!({
                "matched": views.len(),
                "views": views,
            }))
        }
        Command::Rank(args) => {
            let candidates = load_candidates(&args.candidates)?;
            let preference = load_preference(args.preference.as_deref())?;
            let ranked = rank_cares(&candidates, &preference)?;
            print_value(&serde_json::json!({
                "tie_breakers": rank_tie_breakers(),
                "ranked": ranked,
            }))
        }
        Command::Recommend(args) => {
            let store = load_store(&cli.store)?;
            let indices = ConcernIndices::build(&store);
            let query = args.query.to_query();
            let preference = load_preference(args.preference.as_deref())?;
            let recommendations = recommend(&store, &indices, &query, &preference)?;
            print_value(&serde_json::json!({
                "query": query,
                "recommendations": recommendations,
            }))
        }
    }
}
