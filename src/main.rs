mod assets;
mod config;
mod convert;
mod db;
mod error;
mod parser;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::assets::HostedStore;
use crate::config::Settings;
use crate::convert::StagedUpload;
use crate::parser::fields::{CandidateStudent, EventContext, Position};
use crate::parser::ExtractOptions;

#[derive(Parser)]
#[command(name = "athletic_import", about = "Bulk roster import for athletic events")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract candidate students from a roster document for review
    Preview {
        /// Roster document (.docx, .html)
        file: PathBuf,
        /// Activity name, e.g. "Football"
        #[arg(short, long)]
        activity: String,
        /// 1st, 2nd, 3rd or Participated
        #[arg(short, long)]
        position: String,
        /// Where to write the candidates (default: timestamped file in cwd)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Save a reviewed candidates file
    Save {
        file: PathBuf,
    },
    /// Preview + save in one step, skipping review
    Import {
        file: PathBuf,
        #[arg(short, long)]
        activity: String,
        #[arg(short, long)]
        position: String,
    },
    /// Show one student and their events
    Show {
        /// University registration number
        #[arg(long)]
        urn: String,
    },
    /// Show storage statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = config::load()?;

    let result = match cli.command {
        Commands::Preview {
            file,
            activity,
            position,
            out,
        } => {
            let candidates = preview(&settings, &file, &activity, &position).await?;
            let out = out.unwrap_or_else(default_output_path);
            let json = serde_json::to_string_pretty(&candidates)?;
            std::fs::write(&out, json).with_context(|| format!("writing {}", out.display()))?;
            print_candidates(&candidates);
            println!(
                "\nWrote {} candidates to {}. Review, then run 'save {}'.",
                candidates.len(),
                out.display(),
                out.display()
            );
            Ok(())
        }
        Commands::Save { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let candidates: Vec<CandidateStudent> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", file.display()))?;
            save(&settings, &candidates)
        }
        Commands::Import {
            file,
            activity,
            position,
        } => {
            let candidates = preview(&settings, &file, &activity, &position).await?;
            if candidates.is_empty() {
                println!("No student rows found in {}.", file.display());
                return Ok(());
            }
            save(&settings, &candidates)
        }
        Commands::Show { urn } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            match db::fetch_student(&conn, &urn)? {
                Some(student) => println!("{}", serde_json::to_string_pretty(&student)?),
                None => println!("No student with URN {}.", urn),
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Students:       {}", s.students);
            println!("Events:         {}", s.events);
            println!("Missing images: {}", s.flagged);
            for (position, n) in &s.by_position {
                println!("  {:<13} {}", position.as_str(), n);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn preview(
    settings: &Settings,
    file: &Path,
    activity: &str,
    position: &str,
) -> anyhow::Result<Vec<CandidateStudent>> {
    let position: Position = position.parse()?;
    let ctx = EventContext::new(activity, position)?;
    let converter = convert::converter_for(file)?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;
    let store = HostedStore::from_settings(client, &settings.cloudinary);
    let opts = ExtractOptions::from_settings(settings);

    let staged = StagedUpload::stage(file, &settings.staging_dir)
        .with_context(|| format!("staging {}", file.display()))?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(format!("extracting {}", file.display()));
    pb.enable_steady_tick(Duration::from_millis(120));

    let result = parser::preview_document(staged, converter.as_ref(), &ctx, &store, &opts).await;
    pb.finish_and_clear();
    Ok(result?)
}

fn save(settings: &Settings, candidates: &[CandidateStudent]) -> anyhow::Result<()> {
    let conn = db::connect(&settings.db_path)
        .with_context(|| format!("opening {}", settings.db_path.display()))?;
    db::init_schema(&conn)?;
    let stats = db::save_candidates(&conn, candidates)?;
    println!(
        "Saved {} candidates: {} new students, {} new events, {} already recorded.",
        candidates.len(),
        stats.students_added,
        stats.events_added,
        stats.duplicate_events
    );
    Ok(())
}

fn default_output_path() -> PathBuf {
    PathBuf::from(format!(
        "candidates-{}.json",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ))
}

fn print_candidates(candidates: &[CandidateStudent]) {
    println!(
        "{:>4} | {:<24} | {:<12} | {:<10} | {:<3} | {:<3}",
        "#", "Name", "URN", "DOB", "Sig", "Pic"
    );
    println!("{}", "-".repeat(70));
    for c in candidates {
        let mark = |url: &str| if url.is_empty() { "-" } else { "yes" };
        println!(
            "{:>4} | {:<24} | {:<12} | {:<10} | {:<3} | {:<3}{}",
            c.sr_no,
            truncate(&c.name, 24),
            truncate(&c.university_reg_no, 12),
            truncate(&c.dob, 10),
            mark(&c.signature_url),
            mark(&c.passport_photo_url),
            if c.images_missing { "  (upload failed)" } else { "" }
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
