use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Monitored ticketing platform.
///
/// The set of sources is closed; each monitor is bound to exactly one
/// platform when it is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ticketmaster,
    Fansale,
    Vivaticket,
    Eventim,
}

impl Platform {
    pub const ALL: [Self; 4] = [
        Self::Ticketmaster,
        Self::Fansale,
        Self::Vivaticket,
        Self::Eventim,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ticketmaster => "ticketmaster",
            Self::Fansale => "fansale",
            Self::Vivaticket => "vivaticket",
            Self::Eventim => "eventim",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ticketmaster" => Ok(Self::Ticketmaster),
            "fansale" => Ok(Self::Fansale),
            "vivaticket" => Ok(Self::Vivaticket),
            "eventim" => Ok(Self::Eventim),
            _ => Err(anyhow::anyhow!("Invalid platform: {s}")),
        }
    }
}

/// Opportunity priority; each level carries a rank and a speed multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Numeric rank, 1 (most urgent) through 4.
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Normal => 3,
            Self::Low => 4,
        }
    }

    /// Divisor applied to stagger delays.
    pub const fn speed_multiplier(&self) -> f64 {
        match self {
            Self::Critical => 2.0,
            Self::High => 1.5,
            Self::Normal => 1.0,
            Self::Low => 0.7,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(anyhow::anyhow!("Invalid priority: {s}")),
        }
    }
}

/// Deterministic dedup key of a logical opportunity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest of (source, event, section, price, quantity).
    ///
    /// Event and section are trimmed and lower-cased, price is rounded to
    /// cents, so cosmetic differences between observations collapse.
    pub fn compute(
        source: Platform,
        event_name: &str,
        section: &str,
        price: f64,
        quantity: u32,
    ) -> Self {
        let canonical = format!(
            "{}|{}|{}|{:.2}|{}",
            source,
            event_name.trim().to_lowercase(),
            section.trim().to_lowercase(),
            price,
            quantity
        );
        Self(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal and transient states of an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Queued,
    InFlight,
    Won,
    Exhausted,
    Expired,
}

impl OpportunityStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Won | Self::Exhausted | Self::Expired)
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::InFlight => write!(f, "in_flight"),
            Self::Won => write!(f, "won"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// A discovered, time-decaying ticket listing eligible for a claim attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub fingerprint: Fingerprint,
    pub source: Platform,
    pub event_name: String,
    pub section: String,
    pub price: f64,
    pub quantity: u32,
    /// Listing URL handed to the executor, when the monitor knows it.
    pub url: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub priority: Priority,
    /// Monitor's confidence that the listing is genuine, in [0, 1].
    pub confidence_score: f64,
    /// Re-observations plus failed strikes.
    pub attempt_count: u32,
    /// Completed strikes against this opportunity.
    pub strikes: u32,
    /// Selection score of each agent sent at this opportunity.
    pub per_agent_scores: HashMap<String, f64>,
}

impl Opportunity {
    pub fn new(
        source: Platform,
        event_name: impl Into<String>,
        section: impl Into<String>,
        price: f64,
        quantity: u32,
    ) -> Self {
        let event_name = event_name.into();
        let section = section.into();
        let fingerprint = Fingerprint::compute(source, &event_name, &section, price, quantity);

        Self {
            id: Uuid::new_v4(),
            fingerprint,
            source,
            event_name,
            section,
            price,
            quantity,
            url: None,
            detected_at: Utc::now(),
            priority: Priority::Normal,
            confidence_score: 0.5,
            attempt_count: 0,
            strikes: 0,
            per_agent_scores: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = confidence.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub const fn detected_at(mut self, at: DateTime<Utc>) -> Self {
        self.detected_at = at;
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Seconds since detection, never negative.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.detected_at).num_milliseconds();
        (millis as f64 / 1000.0).max(0.0)
    }

    /// Fresh when younger than the configured freshness window.
    pub fn is_fresh(&self, window: std::time::Duration, now: DateTime<Utc>) -> bool {
        self.age_seconds(now) < window.as_secs_f64()
    }

    /// Whether the hard expiry ceiling has passed, regardless of score.
    pub fn is_expired(&self, ceiling: std::time::Duration, now: DateTime<Utc>) -> bool {
        self.age_seconds(now) >= ceiling.as_secs_f64()
    }

    /// Fold a fresh observation of the same listing into this entry.
    pub fn merge_observation(&mut self, confidence: f64, price: f64) {
        self.attempt_count += 1;
        self.confidence_score = confidence.clamp(0.0, 1.0);
        self.price = price;
    }
}
