use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use facerank_vision::Embedding;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Model, StandardScaler};
use crate::roster::SimplePlayer;
use crate::trainer;

/// One league-report record. Field order is the report's key order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedPlayer {
    pub rank: usize,
    pub player: SimplePlayer,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonSummary {
    #[serde(default)]
    pub goals: Option<i64>,
    #[serde(default)]
    pub assists: Option<i64>,
    #[serde(default)]
    pub points: Option<i64>,
    #[serde(default)]
    pub games_played: Option<i64>,
    #[serde(default)]
    pub avg_toi: Option<String>,
}

/// A ranked player joined with external stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatsRecord {
    pub rank: usize,
    pub player: SimplePlayer,
    pub score: f32,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub birth_country: Option<String>,
    #[serde(default)]
    pub season_totals: Option<SeasonSummary>,
}

impl PlayerStatsRecord {
    /// Playing-time weight: average time-on-ice seconds times games played.
    /// Zero when either figure is missing.
    pub fn playing_time_weight(&self) -> f32 {
        let Some(totals) = &self.season_totals else {
            return 0.0;
        };
        let toi = totals
            .avg_toi
            .as_deref()
            .and_then(crate::roster::parse_avg_toi)
            .unwrap_or(0.0);
        let games = totals.games_played.unwrap_or(0) as f32;
        toi * games
    }
}

/// Per-item failure record for the errors sidecar file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingError {
    pub player_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub headshot: String,
    pub error: String,
}

/// Applies a persisted model and its paired scaler to embeddings. Loading
/// fails fast when either artifact is missing, before any extraction runs.
pub struct Scorer {
    model: Model,
    scaler: StandardScaler,
}

impl Scorer {
    pub fn load(cfg: &Config) -> Result<Self> {
        let (model, scaler) = trainer::load_artifacts(&cfg.cache_dir, &cfg.model_stem)?;
        Ok(Self { model, scaler })
    }

    pub fn from_parts(model: Model, scaler: StandardScaler) -> Self {
        Self { model, scaler }
    }

    pub fn model_family(&self) -> &'static str {
        self.model.family()
    }

    /// Transform with the fitted scaler (never re-fit), then predict.
    pub fn score_embedding(&self, embedding: &Embedding) -> f32 {
        let features = self.scaler.transform_row(embedding.as_slice());
        self.model.predict(&features)
    }
}

/// Rank scored entries descending; ties keep input order (stable sort).
/// Positions are 1-based.
pub fn rank<T>(scored: Vec<(T, f32)>) -> Vec<(usize, T, f32)> {
    let mut scored = scored;
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
        .into_iter()
        .enumerate()
        .map(|(i, (label, score))| (i + 1, label, score))
        .collect()
}

pub fn percentile(rank: usize, total: usize) -> f32 {
    if total == 0 {
        return 0.0;
    }
    rank as f32 / total as f32 * 100.0
}

/// Per-group aggregate of scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStat {
    pub key: String,
    pub count: usize,
    pub mean: f32,
    /// Absent when the group's total weight is zero; such groups are
    /// excluded from weighted output rather than reported as zero.
    #[serde(default)]
    pub weighted_mean: Option<f32>,
}

/// Group (key, score, weight) triples and compute the plain and weighted mean
/// per group. Output is ordered by mean descending, then key.
pub fn aggregate(items: &[(String, f32, f32)]) -> Vec<GroupStat> {
    struct Acc {
        count: usize,
        sum: f64,
        weighted_sum: f64,
        weight: f64,
    }

    let mut groups: BTreeMap<String, Acc> = BTreeMap::new();
    for (key, score, weight) in items {
        let acc = groups.entry(key.clone()).or_insert(Acc {
            count: 0,
            sum: 0.0,
            weighted_sum: 0.0,
            weight: 0.0,
        });
        acc.count += 1;
        acc.sum += *score as f64;
        acc.weighted_sum += (*score as f64) * (*weight as f64);
        acc.weight += *weight as f64;
    }

    let mut stats: Vec<GroupStat> = groups
        .into_iter()
        .map(|(key, acc)| GroupStat {
            key,
            count: acc.count,
            mean: (acc.sum / acc.count as f64) as f32,
            weighted_mean: if acc.weight > 0.0 {
                Some((acc.weighted_sum / acc.weight) as f32)
            } else {
                None
            },
        })
        .collect();

    stats.sort_by(|a, b| b.mean.total_cmp(&a.mean).then_with(|| a.key.cmp(&b.key)));
    stats
}

/// The three aggregation axes over the stats report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub by_country: Vec<GroupStat>,
    pub by_position: Vec<GroupStat>,
    pub by_team: Vec<GroupStat>,
}

/// Write any serializable value pretty-printed for human review.
pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(value).context("encoding report")?;
    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Write a report as a pretty-printed JSON array of records.
pub fn write_json_report<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    write_json_pretty(path, &records)
}

pub fn read_json_report<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(Error::SourceNotFound {
            path: path.to_path_buf(),
        });
    }
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", path.display()))
        .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RidgeModel;
    use ndarray::array;

    #[test]
    fn rank_sorts_descending_with_stable_ties() {
        let ranked = rank(vec![("A", 3.0f32), ("B", 5.0), ("C", 5.0)]);
        let order: Vec<&str> = ranked.iter().map(|(_, label, _)| *label).collect();
        assert_eq!(order, ["B", "C", "A"]);
        assert_eq!(ranked[0].0, 1);
        assert_eq!(ranked[2].0, 3);
    }

    #[test]
    fn percentile_is_rank_over_total() {
        assert!((percentile(1, 4) - 25.0).abs() < 1e-6);
        assert!((percentile(4, 4) - 100.0).abs() < 1e-6);
        assert_eq!(percentile(1, 0), 0.0);
    }

    #[test]
    fn aggregate_computes_plain_and_weighted_means() {
        let items = vec![
            ("CAN".to_string(), 4.0f32, 2.0f32),
            ("CAN".to_string(), 2.0, 1.0),
            ("SWE".to_string(), 3.0, 1.0),
        ];
        let stats = aggregate(&items);

        let can = stats.iter().find(|s| s.key == "CAN").unwrap();
        assert_eq!(can.count, 2);
        assert!((can.mean - 3.0).abs() < 1e-6);
        // (4*2 + 2*1) / 3
        assert!((can.weighted_mean.unwrap() - 10.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn aggregate_excludes_zero_weight_groups_from_weighted_output() {
        let items = vec![
            ("USA".to_string(), 4.0f32, 0.0f32),
            ("USA".to_string(), 2.0, 0.0),
            ("FIN".to_string(), 3.5, 1.0),
        ];
        let stats = aggregate(&items);

        let usa = stats.iter().find(|s| s.key == "USA").unwrap();
        assert!(usa.weighted_mean.is_none());
        assert!((usa.mean - 3.0).abs() < 1e-6);

        let fin = stats.iter().find(|s| s.key == "FIN").unwrap();
        assert_eq!(fin.weighted_mean, Some(3.5));
    }

    #[test]
    fn scorer_uses_the_fitted_scaler_without_refit() {
        let train = array![[0.0f32], [2.0], [4.0]];
        let scaler = StandardScaler::fit(train.view());
        // Identity-ish model: predict the (scaled) single feature.
        let scorer = Scorer::from_parts(
            Model::Ridge(RidgeModel {
                weights: vec![1.0],
                intercept: 0.0,
            }),
            scaler.clone(),
        );

        let embedding = Embedding {
            vector: ndarray::Array1::from_vec(vec![2.0]),
        };
        // Mean 2, population sd sqrt(8/3); scaled value of 2.0 is exactly 0.
        assert!((scorer.score_embedding(&embedding) - 0.0).abs() < 1e-6);

        // Scoring again must not shift anything (no hidden re-fit).
        assert_eq!(
            scorer.score_embedding(&embedding),
            scorer.score_embedding(&embedding)
        );
    }

    #[test]
    fn playing_time_weight_multiplies_toi_by_games() {
        let record = PlayerStatsRecord {
            rank: 1,
            player: SimplePlayer {
                id: 1,
                headshot: "h".into(),
                first_name: "A".into(),
                last_name: "B".into(),
            },
            score: 3.0,
            team: Some("TOR".into()),
            position: Some("C".into()),
            birth_country: Some("CAN".into()),
            season_totals: Some(SeasonSummary {
                goals: Some(10),
                assists: Some(10),
                points: Some(20),
                games_played: Some(10),
                avg_toi: Some("20:00".into()),
            }),
        };
        assert!((record.playing_time_weight() - 12000.0).abs() < 1e-3);

        let no_stats = PlayerStatsRecord {
            season_totals: None,
            ..record
        };
        assert_eq!(no_stats.playing_time_weight(), 0.0);
    }

    #[test]
    fn json_report_roundtrips_with_stable_shape() {
        let dir = std::env::temp_dir().join(format!("facerank-report-{}", uuid::Uuid::new_v4()));
        let path = dir.join("attractiveness_analysis.json");

        let records = vec![RankedPlayer {
            rank: 1,
            player: SimplePlayer {
                id: 42,
                headshot: "https://img/42.png".into(),
                first_name: "First".into(),
                last_name: "Last".into(),
            },
            score: 4.25,
        }];
        write_json_report(&path, &records).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        // Pretty-printed, rank before player before score.
        assert!(raw.contains("\n  "));
        let rank_pos = raw.find("\"rank\"").unwrap();
        let player_pos = raw.find("\"player\"").unwrap();
        let score_pos = raw.find("\"score\"").unwrap();
        assert!(rank_pos < player_pos && player_pos < score_pos);

        let back: Vec<RankedPlayer> = read_json_report(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].player.id, 42);

        match read_json_report::<RankedPlayer>(&dir.join("missing.json")) {
            Err(Error::SourceNotFound { .. }) => {}
            other => panic!("expected SourceNotFound, got {other:?}"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
