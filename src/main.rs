use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use ndarray::{Array1, Array2};

use facerank::cache::{EmbeddingCache, Fingerprint};
use facerank::config::{self, Config};
use facerank::dataset;
use facerank::extractor::{Extractor, ImageSource};
use facerank::model::EstimatorSpec;
use facerank::report::{
    self, AggregateReport, PlayerStatsRecord, ProcessingError, RankedPlayer, Scorer,
    SeasonSummary,
};
use facerank::roster::{RosterClient, SimplePlayer, TEAM_CODES};
use facerank::trainer::{self, TrainConfig};

const LEAGUE_REPORT: &str = "attractiveness_analysis.json";
const STATS_REPORT: &str = "attractive_players_with_stats.json";
const AGGREGATE_REPORT: &str = "aggregate_analysis.json";
const ERRORS_REPORT: &str = "processing-errors.json";

#[derive(Parser)]
#[command(name = "facerank")]
#[command(
    version,
    about = "Face attractiveness scoring and league ranking pipeline"
)]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train candidate models on the labeled face datasets
    Train {
        /// Rebuild the embedding cache even if a cache file exists
        #[arg(long)]
        regenerate: bool,
    },
    /// Predict the attractiveness score of one image
    Predict {
        /// Image file to score
        image: PathBuf,
    },
    /// Score every player headshot in the league and write the ranking
    League,
    /// Join the ranked players with their season stats from the API
    CollectStats,
    /// Print and persist aggregate tables from the stats report
    Report,
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Train { regenerate } => train(&cfg, regenerate),
        Commands::Predict { image } => predict(&cfg, &image),
        Commands::League => league(&cfg),
        Commands::CollectStats => collect_stats(&cfg),
        Commands::Report => aggregate_report(&cfg),
        Commands::Config => open_config(),
    }
}

fn train(cfg: &Config, regenerate: bool) -> Result<()> {
    let samples = dataset::load_training_set(cfg)?;

    let cache = EmbeddingCache::new(&cfg.cache_dir, regenerate || cfg.regenerate_embeddings);
    let fingerprint =
        Fingerprint::new("combined", cfg.subject_filter.map(|f| f.to_string()));

    let entry = cache.get_or_build(&fingerprint, || {
        let mut extractor = Extractor::new(cfg)?;
        extractor.embed_all(&samples)
    })?;

    if entry.is_empty() {
        anyhow::bail!("no embeddings available; every sample failed extraction");
    }
    info!("total samples: {}", entry.len());

    let flat: Vec<f32> = entry.embeddings.iter().flatten().copied().collect();
    let x = Array2::from_shape_vec((entry.len(), entry.dim), flat)
        .context("assembling feature matrix")?;
    let y = Array1::from_vec(entry.scores.clone());

    let outcome = trainer::train(
        x.view(),
        y.view(),
        &EstimatorSpec::default_candidates(),
        &TrainConfig::default(),
    )?;

    info!("{:<24} {:>10} {:>10} {:>10}", "candidate", "cv mse", "test mse", "test mae");
    for r in &outcome.reports {
        let cv = r
            .cv_mse
            .map(|v| format!("{v:.6}"))
            .unwrap_or_else(|| "-".to_string());
        info!(
            "{:<24} {:>10} {:>10.6} {:>10.6}",
            r.label, cv, r.test_mse, r.test_mae
        );
    }

    trainer::save_artifacts(&cfg.cache_dir, &cfg.model_stem, &outcome.model, &outcome.scaler)?;
    info!("✓ trained and saved {}", outcome.winner);
    Ok(())
}

fn predict(cfg: &Config, image: &std::path::Path) -> Result<()> {
    // Fail on missing artifacts before any extraction work.
    let scorer = Scorer::load(cfg)?;
    info!("loaded {} model", scorer.model_family());

    let mut extractor = Extractor::new(cfg)?;
    let identifier = image.display().to_string();
    let embedding = extractor.extract(&identifier, ImageSource::Path(image))?;
    let score = scorer.score_embedding(&embedding);

    info!("predicted attractiveness score for {identifier}: {score:.4}");

    // When a league ranking exists, place this image within it.
    let league_path = cfg.reports_dir.join(LEAGUE_REPORT);
    if league_path.exists() {
        let ranked: Vec<RankedPlayer> = report::read_json_report(&league_path)?;
        let position = ranked.iter().filter(|r| r.score > score).count() + 1;
        let total = ranked.len() + 1;
        info!(
            "would rank {position} of {total} (percentile {:.1}%)",
            report::percentile(position, total)
        );
    }
    Ok(())
}

fn league(cfg: &Config) -> Result<()> {
    // Model and scaler must exist before any network or extraction work.
    let scorer = Scorer::load(cfg)?;
    info!("loaded {} model", scorer.model_family());

    let client = RosterClient::new(cfg)?;
    let mut extractor = Extractor::new(cfg)?;

    info!("fetching players from all {} teams...", TEAM_CODES.len());
    let mut players: Vec<SimplePlayer> = Vec::new();
    for (i, team) in TEAM_CODES.iter().enumerate() {
        if i > 0 {
            client.pace();
        }
        match client.simplified_players(team) {
            Ok(mut team_players) => {
                info!("  {team}: {} players", team_players.len());
                players.append(&mut team_players);
            }
            Err(e) => warn!("  {team}: {e}"),
        }
    }
    info!("total players fetched: {}", players.len());

    let mut scored: Vec<(SimplePlayer, f32)> = Vec::new();
    let mut failures: Vec<ProcessingError> = Vec::new();
    for (i, player) in players.into_iter().enumerate() {
        match extractor.extract(&player.headshot, ImageSource::Url(&player.headshot)) {
            Ok(embedding) => {
                let score = scorer.score_embedding(&embedding);
                scored.push((player, score));
            }
            Err(e) => {
                warn!(
                    "  error processing {} {}: {e}",
                    player.first_name, player.last_name
                );
                failures.push(ProcessingError {
                    player_id: player.id,
                    first_name: player.first_name,
                    last_name: player.last_name,
                    headshot: player.headshot,
                    error: e.to_string(),
                });
            }
        }
        if (i + 1) % 50 == 0 {
            info!("  processed {} players", i + 1);
        }
    }
    info!(
        "successfully processed {} players, {} failures",
        scored.len(),
        failures.len()
    );

    let ranked: Vec<RankedPlayer> = report::rank(scored)
        .into_iter()
        .map(|(rank, player, score)| RankedPlayer {
            rank,
            player,
            score,
        })
        .collect();

    info!("top 10 most attractive players:");
    for r in ranked.iter().take(10) {
        info!(
            "{:2}. {} {} - score: {:.4}",
            r.rank, r.player.first_name, r.player.last_name, r.score
        );
    }

    let league_path = cfg.reports_dir.join(LEAGUE_REPORT);
    report::write_json_report(&league_path, &ranked)?;
    info!("full analysis saved to {}", league_path.display());

    if !failures.is_empty() {
        let errors_path = cfg.reports_dir.join(ERRORS_REPORT);
        report::write_json_report(&errors_path, &failures)?;
        info!("processing errors saved to {}", errors_path.display());
    }
    Ok(())
}

fn collect_stats(cfg: &Config) -> Result<()> {
    let league_path = cfg.reports_dir.join(LEAGUE_REPORT);
    let ranked: Vec<RankedPlayer> = report::read_json_report(&league_path)?;
    info!("fetching stats for {} players...", ranked.len());

    let season: i64 = cfg
        .season
        .parse()
        .with_context(|| format!("season {:?} is not numeric", cfg.season))?;
    let client = RosterClient::new(cfg)?;

    let mut records: Vec<PlayerStatsRecord> = Vec::new();
    for (i, entry) in ranked.into_iter().enumerate() {
        if i > 0 {
            client.pace();
        }
        let landing = match client.player_landing(entry.player.id) {
            Ok(landing) => landing,
            Err(e) => {
                warn!("  error fetching stats for player {}: {e}", entry.player.id);
                continue;
            }
        };

        let season_totals = landing.season_totals_for(season).map(|t| SeasonSummary {
            goals: t.goals,
            assists: t.assists,
            points: t.points,
            games_played: t.games_played,
            avg_toi: t.avg_toi.clone(),
        });
        records.push(PlayerStatsRecord {
            rank: entry.rank,
            player: entry.player,
            score: entry.score,
            team: landing.current_team_abbrev,
            position: landing.position,
            birth_country: landing.birth_country,
            season_totals,
        });

        if (i + 1) % 10 == 0 {
            info!("  processed {} players", i + 1);
        }
    }

    let stats_path = cfg.reports_dir.join(STATS_REPORT);
    report::write_json_report(&stats_path, &records)?;
    info!(
        "collected stats for {} players, saved to {}",
        records.len(),
        stats_path.display()
    );
    Ok(())
}

fn aggregate_report(cfg: &Config) -> Result<()> {
    let stats_path = cfg.reports_dir.join(STATS_REPORT);
    let records: Vec<PlayerStatsRecord> = report::read_json_report(&stats_path)?;
    info!("loaded {} players with stats", records.len());

    for r in records.iter().take(5) {
        info!(
            "{:2}. {} {} - score {:.2}, {} {}",
            r.rank,
            r.player.first_name,
            r.player.last_name,
            r.score,
            r.position.as_deref().unwrap_or("?"),
            r.team.as_deref().unwrap_or("?")
        );
    }

    let by = |key: fn(&PlayerStatsRecord) -> Option<&String>| {
        let items: Vec<(String, f32, f32)> = records
            .iter()
            .filter_map(|r| key(r).map(|k| (k.clone(), r.score, r.playing_time_weight())))
            .collect();
        report::aggregate(&items)
    };

    let aggregates = AggregateReport {
        by_country: by(|r| r.birth_country.as_ref()),
        by_position: by(|r| r.position.as_ref()),
        by_team: by(|r| r.team.as_ref()),
    };

    info!("mean score by birth country:");
    for g in &aggregates.by_country {
        match g.weighted_mean {
            Some(w) => info!("  {:<4} n={:<3} mean {:.3} weighted {:.3}", g.key, g.count, g.mean, w),
            None => info!("  {:<4} n={:<3} mean {:.3}", g.key, g.count, g.mean),
        }
    }

    info!("mean score by team (with points pct):");
    for g in &aggregates.by_team {
        let pct = facerank::roster::team_point_pct(&cfg.standings_file, &g.key);
        info!(
            "  {:<4} n={:<3} mean {:.3} point pct {:.3}",
            g.key, g.count, g.mean, pct
        );
    }

    let aggregate_path = cfg.reports_dir.join(AGGREGATE_REPORT);
    report::write_json_pretty(&aggregate_path, &aggregates)?;
    info!("aggregates saved to {}", aggregate_path.display());
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("opening config file: {config_path:?}");

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("failed to open editor")?;

    if !status.success() {
        anyhow::bail!("editor exited with non-zero status");
    }

    Ok(())
}
