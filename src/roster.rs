use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use log::warn;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};

/// Three-letter codes of the active franchises.
pub const TEAM_CODES: [&str; 32] = [
    "ANA", "BOS", "BUF", "CAR", "CBJ", "CGY", "CHI", "COL", "DAL", "DET", "EDM", "FLA", "LAK",
    "MIN", "MTL", "NJD", "NSH", "NYI", "NYR", "OTT", "PHI", "PIT", "SEA", "SJS", "STL", "TBL",
    "TOR", "UTA", "VAN", "VGK", "WPG", "WSH",
];

/// Names come localized; only the default rendering is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizedName {
    pub default: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterPlayer {
    pub id: i64,
    #[serde(default)]
    pub headshot: String,
    pub first_name: LocalizedName,
    pub last_name: LocalizedName,
    #[serde(default)]
    pub position_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRoster {
    pub forwards: Vec<RosterPlayer>,
    pub defensemen: Vec<RosterPlayer>,
    pub goalies: Vec<RosterPlayer>,
}

/// The subset of a roster entry the scoring pipeline needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimplePlayer {
    pub id: i64,
    pub headshot: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonTotal {
    pub season: i64,
    #[serde(default)]
    pub goals: Option<i64>,
    #[serde(default)]
    pub assists: Option<i64>,
    #[serde(default)]
    pub points: Option<i64>,
    #[serde(default)]
    pub pim: Option<i64>,
    #[serde(default)]
    pub plus_minus: Option<i64>,
    #[serde(default)]
    pub games_played: Option<i64>,
    #[serde(default)]
    pub avg_toi: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLanding {
    pub player_id: i64,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub current_team_abbrev: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub birth_country: Option<String>,
    #[serde(default)]
    pub shoots_catches: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub season_totals: Option<Vec<SeasonTotal>>,
}

impl PlayerLanding {
    /// First totals entry for the given season; the feed lists entries
    /// per league and game type, the first match mirrors the join used by
    /// the stats collection.
    pub fn season_totals_for(&self, season: i64) -> Option<&SeasonTotal> {
        self.season_totals
            .as_ref()?
            .iter()
            .find(|t| t.season == season)
    }
}

/// Blocking client for the roster API. A fixed pause between calls keeps the
/// batch under the third party's (unpublished) rate limit.
pub struct RosterClient {
    http: Client,
    base_url: String,
    season: String,
    delay: Duration,
}

impl RosterClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            base_url: cfg.api_base.trim_end_matches('/').to_string(),
            season: cfg.season.clone(),
            delay: Duration::from_secs(cfg.request_delay_secs),
        })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.http.get(url).send().map_err(|e| Error::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        response
            .json::<T>()
            .with_context(|| format!("parsing payload from {url}"))
            .map_err(Error::from)
    }

    /// Sleep out the inter-request pause. Callers invoke this between
    /// consecutive API calls, not after the last one.
    pub fn pace(&self) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }

    pub fn team_roster(&self, team_code: &str) -> Result<TeamRoster> {
        let url = format!("{}/roster/{}/{}", self.base_url, team_code, self.season);
        self.get_json(&url)
    }

    /// Roster flattened to scoring inputs; players without a headshot URL
    /// cannot be embedded and are skipped here.
    pub fn simplified_players(&self, team_code: &str) -> Result<Vec<SimplePlayer>> {
        let roster = self.team_roster(team_code)?;
        Ok(flatten_roster(roster))
    }

    pub fn player_landing(&self, player_id: i64) -> Result<PlayerLanding> {
        let url = format!("{}/player/{}/landing", self.base_url, player_id);
        self.get_json(&url)
    }
}

pub fn flatten_roster(roster: TeamRoster) -> Vec<SimplePlayer> {
    roster
        .forwards
        .into_iter()
        .chain(roster.defensemen)
        .chain(roster.goalies)
        .filter(|p| !p.headshot.trim().is_empty())
        .map(|p| SimplePlayer {
            id: p.id,
            headshot: p.headshot,
            first_name: p.first_name.default,
            last_name: p.last_name.default,
        })
        .collect()
}

/// Points percentage for a team from the local standings snapshot. A missing
/// or unreadable snapshot is tolerated: it logs and yields 0.0.
pub fn team_point_pct(standings_file: &Path, team_code: &str) -> f32 {
    let raw = match std::fs::read_to_string(standings_file) {
        Ok(raw) => raw,
        Err(_) => {
            warn!("standings snapshot not found at {}", standings_file.display());
            return 0.0;
        }
    };
    let value: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("could not parse {}: {}", standings_file.display(), e);
            return 0.0;
        }
    };

    let standings = value
        .get("standings")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();
    for standing in &standings {
        let abbrev = standing
            .get("teamAbbrev")
            .map(|a| match a {
                serde_json::Value::String(s) => s.clone(),
                other => other
                    .get("default")
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
            .unwrap_or_default();
        if abbrev == team_code {
            return standing
                .get("pointPctg")
                .and_then(|p| p.as_f64())
                .unwrap_or(0.0) as f32;
        }
    }
    0.0
}

/// Parse an `MM:SS` time-on-ice string to seconds.
pub fn parse_avg_toi(toi: &str) -> Option<f32> {
    let (minutes, seconds) = toi.trim().split_once(':')?;
    let minutes: f32 = minutes.parse().ok()?;
    let seconds: f32 = seconds.parse().ok()?;
    Some(minutes * 60.0 + seconds)
}
