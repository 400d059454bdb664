//! detection_records - inspect persisted detections
//!
//! Lists saved detections newest first, per-class totals, or the audit log.

use anyhow::Result;
use clap::Parser;

use didray::SqliteDetectionStore;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the detection database.
    #[arg(long, env = "DIDRAY_DB_PATH", default_value = "detections.db")]
    db: String,

    /// Maximum number of rows to show.
    #[arg(long, default_value_t = 50)]
    limit: usize,

    /// Show how many saved rows each class appears in.
    #[arg(long, conflicts_with = "audit")]
    stats: bool,

    /// Show the audit log instead of detections.
    #[arg(long)]
    audit: bool,

    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let store = SqliteDetectionStore::open(&args.db)?;

    if args.stats {
        let stats = store.detection_statistics()?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else if stats.is_empty() {
            println!("no detections recorded");
        } else {
            for (label, count) in &stats {
                println!("{:<20} {}", label, count);
            }
        }
        return Ok(());
    }

    if args.audit {
        let entries = store.audit_log(args.limit)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        } else {
            for entry in &entries {
                println!("{}  {:<16} {}", entry.timestamp, entry.actor, entry.action);
            }
        }
        return Ok(());
    }

    let events = store.fetch_detections(args.limit)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    if events.is_empty() {
        println!("no detections recorded");
    }
    for event in &events {
        let confidences: Vec<String> = event
            .confidences
            .iter()
            .map(|c| format!("{:.2}", c))
            .collect();
        println!(
            "{}  {:<5}  {:<12} {:<10} {} [{}]  {}",
            event.timestamp,
            event.mode.as_str(),
            event.operator,
            event.role,
            event.class_labels.join(", "),
            confidences.join(";"),
            event.image_path
        );
    }
    Ok(())
}
