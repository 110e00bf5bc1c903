#![forbid(unsafe_code)]

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use uuid::Uuid;

use skill_radar::axes::default_axis_seed;
use skill_radar::engine::DEFAULT_MODEL;
use skill_radar::gateway::{NoopUsageSink, ProviderGateway};
use skill_radar::radar::radar_to_values;
use skill_radar::store::{SnapshotSource, SnapshotStatus, SqliteRadarStore};
use skill_radar::{RadarEngine, RoleAnswer, RoleContext};

#[derive(Parser)]
#[command(name = "radar", version, about = "Skill radar CLI")]
struct Cli {
    /// Path to the SQLite store (defaults to RADAR_STORE or .skill_radar.sqlite)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed the default axis catalog
    SeedAxes,
    /// List the active axis catalog
    Axes,
    /// Add or replace an axis in the active catalog
    AddAxis {
        #[arg(long)]
        key: String,
        #[arg(long)]
        label: String,
        #[arg(long, default_value = "en")]
        locale: String,
    },
    /// Retire an axis from the active catalog
    RemoveAxis {
        #[arg(long)]
        key: String,
    },
    /// Generate a radar draft for a role from a role JSON file
    Generate {
        /// Path to a JSON file: {"role": {...}, "answers": [{"slug", "text"}]}
        #[arg(long)]
        role: PathBuf,
        /// Model to use for AI scoring
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,
        /// Skip the AI call and use the heuristic scorer
        #[arg(long)]
        no_ai: bool,
    },
    /// List snapshots for a role
    Snapshots {
        #[arg(long)]
        role_id: Uuid,
        /// Filter: draft or confirmed
        #[arg(long)]
        status: Option<String>,
    },
    /// Print the sanitized radar of a snapshot
    Show {
        snapshot_id: Uuid,
    },
    /// Confirm a snapshot (demotes any other confirmed snapshot for the role)
    Confirm {
        snapshot_id: Uuid,
    },
    /// Delete draft snapshots (rejected in full if any is confirmed)
    Delete {
        snapshot_ids: Vec<Uuid>,
    },
    /// Save a client radar into the role's current draft
    Save {
        /// Path to a JSON file: {"role": {...}, "answers": [...]}
        #[arg(long)]
        role: PathBuf,
        /// Path to a JSON array of radar entries
        #[arg(long)]
        radar: PathBuf,
        /// Tag the draft as accepted from a chat refinement turn
        #[arg(long)]
        from_chat: bool,
    },
}

#[derive(Deserialize)]
struct RoleFile {
    role: RoleContext,
    #[serde(default)]
    answers: Vec<RoleAnswer>,
}

fn load_role(path: &PathBuf) -> Result<RoleFile, Box<dyn std::error::Error>> {
    Ok(serde_json::from_reader(File::open(path)?)?)
}

fn engine_for(
    store: SqliteRadarStore,
    model: &str,
    no_ai: bool,
) -> Result<RadarEngine, Box<dyn std::error::Error>> {
    if no_ai || std::env::var("OPENROUTER_API_KEY").is_err() {
        return Ok(RadarEngine::heuristic_only(store));
    }
    let gateway = ProviderGateway::from_env(Arc::new(NoopUsageSink))?;
    Ok(RadarEngine::new(store, Arc::new(gateway)).with_model(model))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let path = cli.db.unwrap_or_else(SqliteRadarStore::default_path);
    let store = SqliteRadarStore::new(path)?;

    match cli.command {
        Commands::SeedAxes => {
            for (key, label) in default_axis_seed() {
                store.insert_axis(key, label, "en").await?;
            }
            println!("seeded {} axes", default_axis_seed().len());
        }
        Commands::Axes => {
            for axis in store.list_active_axes().await? {
                println!("{}\t{}\t{}", axis.id, axis.key, axis.label);
            }
        }
        Commands::AddAxis { key, label, locale } => {
            let id = store.insert_axis(&key, &label, &locale).await?;
            println!("axis {key} active as #{id}");
        }
        Commands::RemoveAxis { key } => {
            store.deactivate_axis(&key).await?;
            println!("axis {key} retired");
        }
        Commands::Generate { role, model, no_ai } => {
            let input = load_role(&role)?;
            let engine = engine_for(store, &model, no_ai)?;
            let result = engine.generate(&input.role, &input.answers, None).await?;
            println!(
                "snapshot {} ({})",
                result.snapshot_id,
                result.strategy.as_str()
            );
            if let Some(reason) = result.fallback_reason {
                println!("fallback reason: {reason}");
            }
            for entry in &result.radar {
                println!("{}\t{}", entry.axis_key, entry.score_0_100);
            }
        }
        Commands::Snapshots { role_id, status } => {
            let status = match status.as_deref() {
                Some("draft") => Some(SnapshotStatus::Draft),
                Some("confirmed") => Some(SnapshotStatus::Confirmed),
                Some(other) => return Err(format!("unknown status {other}").into()),
                None => None,
            };
            for snap in store.list_snapshots(role_id, status).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    snap.id,
                    snap.status.as_str(),
                    snap.source.as_str(),
                    snap.created_at
                );
            }
        }
        Commands::Show { snapshot_id } => {
            let axes = store.active_axes().await?;
            let raw: Vec<serde_json::Value> = store
                .get_scores(snapshot_id)
                .await?
                .iter()
                .map(|s| serde_json::to_value(s.to_entry()))
                .collect::<Result<_, _>>()?;
            let radar = skill_radar::sanitize(&raw, &axes);
            println!("{}", serde_json::to_string_pretty(&radar_to_values(&radar))?);
        }
        Commands::Confirm { snapshot_id } => {
            let engine = RadarEngine::heuristic_only(store);
            engine.confirm(snapshot_id).await?;
            println!("snapshot {snapshot_id} confirmed");
        }
        Commands::Delete { snapshot_ids } => {
            if snapshot_ids.is_empty() {
                return Err("delete requires at least one snapshot id".into());
            }
            let engine = RadarEngine::heuristic_only(store);
            let deleted = engine.delete(&snapshot_ids).await?;
            println!("deleted {deleted} snapshots");
        }
        Commands::Save {
            role,
            radar,
            from_chat,
        } => {
            let input = load_role(&role)?;
            let raw: Vec<serde_json::Value> = serde_json::from_reader(File::open(radar)?)?;
            let source = if from_chat {
                SnapshotSource::AiChat
            } else {
                SnapshotSource::Manual
            };
            let engine = RadarEngine::heuristic_only(store);
            let snapshot_id = engine.save(&input.role, &raw, source, None).await?;
            println!("saved into draft {snapshot_id}");
        }
    }

    Ok(())
}
