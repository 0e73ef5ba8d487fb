use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::errors::MonitorError;
use crate::domain::models::{Opportunity, Platform, Priority};
use crate::domain::ports::Monitor;

/// What a platform's listings look like.
struct Catalog {
    events: &'static [&'static str],
    sections: &'static [&'static str],
    price_range: (f64, f64),
    base_url: &'static str,
}

const fn catalog(platform: Platform) -> Catalog {
    match platform {
        Platform::Ticketmaster => Catalog {
            events: &["Coldplay", "Taylor Swift", "Metallica"],
            sections: &["Floor", "Lower Bowl", "Upper Tier"],
            price_range: (80.0, 450.0),
            base_url: "https://www.ticketmaster.it/event",
        },
        Platform::Fansale => Catalog {
            events: &["Vasco Rossi", "Ultimo", "Maneskin"],
            sections: &["Prato", "Tribuna", "Anello"],
            price_range: (45.0, 220.0),
            base_url: "https://www.fansale.it/tickets",
        },
        Platform::Vivaticket => Catalog {
            events: &["Teatro alla Scala", "Arena di Verona", "Lucca Summer"],
            sections: &["Platea", "Galleria", "Palco"],
            price_range: (30.0, 180.0),
            base_url: "https://www.vivaticket.com/it/ticket",
        },
        Platform::Eventim => Catalog {
            events: &["Rammstein", "Depeche Mode", "The Weeknd"],
            sections: &["Stehplatz", "Sitzplatz", "Loge"],
            price_range: (60.0, 300.0),
            base_url: "https://www.eventim.de/event",
        },
    }
}

/// Monitor that invents plausible listings for one platform.
///
/// A small catalog keeps fingerprints repeating, so re-observations and
/// merges happen the way they do against a real listing page.
#[derive(Debug)]
pub struct SimulatedMonitor {
    platform: Platform,
    /// Chance a check finds anything at all
    hit_probability: f64,
    /// Chance a check fails transiently
    error_probability: f64,
    checks: AtomicU64,
}

impl SimulatedMonitor {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            hit_probability: 0.6,
            error_probability: 0.05,
            checks: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_hit_probability(mut self, probability: f64) -> Self {
        self.hit_probability = probability.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn with_error_probability(mut self, probability: f64) -> Self {
        self.error_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }

    fn generate(&self) -> Result<Vec<Opportunity>, MonitorError> {
        let mut rng = rand::thread_rng();

        if rng.gen_bool(self.error_probability) {
            return Err(MonitorError::Transient(format!(
                "{} listing page timed out",
                self.platform
            )));
        }
        if !rng.gen_bool(self.hit_probability) {
            return Ok(Vec::new());
        }

        let catalog = catalog(self.platform);
        let count = rng.gen_range(1..=3);
        let mut listings = Vec::with_capacity(count);

        for _ in 0..count {
            let (Some(event), Some(section)) = (
                catalog.events.choose(&mut rng),
                catalog.sections.choose(&mut rng),
            ) else {
                continue;
            };
            // Whole-euro prices keep fingerprints stable across checks
            let price = rng
                .gen_range(catalog.price_range.0..=catalog.price_range.1)
                .round();
            let quantity = rng.gen_range(1..=4);
            let priority = match rng.gen_range(0..10) {
                0 => Priority::Critical,
                1..=2 => Priority::High,
                3..=7 => Priority::Normal,
                _ => Priority::Low,
            };
            let slug = event.to_lowercase().replace(' ', "-");

            listings.push(
                Opportunity::new(self.platform, *event, *section, price, quantity)
                    .with_priority(priority)
                    .with_confidence(rng.gen_range(0.5..=1.0))
                    .with_url(format!("{}/{slug}", catalog.base_url)),
            );
        }

        Ok(listings)
    }
}

#[async_trait]
impl Monitor for SimulatedMonitor {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn check(&self) -> Result<Vec<Opportunity>, MonitorError> {
        self.checks.fetch_add(1, Ordering::Relaxed);
        self.generate()
    }
}
