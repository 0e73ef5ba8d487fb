//! Table output formatting for CLI commands
//!
//! Renders simulation results with comfy-table. Colors are dropped when
//! `NO_COLOR` is set or the terminal is dumb.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use crate::cli::commands::simulate::SimulationSummary;
use crate::domain::models::{Agent, Platform};
use crate::services::{CircuitStats, StrikeMetrics};

/// Table formatter for CLI output
pub struct TableFormatter {
    /// Whether to use colors in output
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<usize>,
}

impl TableFormatter {
    /// Create a new table formatter
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    /// Create a new table formatter with custom settings
    pub const fn with_config(use_colors: bool, max_width: Option<usize>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// Headline numbers of a run
    pub fn format_summary(&self, summary: &SimulationSummary) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![self.header("Metric"), self.header("Value")]);

        let metrics = &summary.metrics;
        let fastest = metrics
            .fastest_strike_ms
            .map_or_else(|| "-".to_string(), |ms| format!("{ms}ms"));

        let rows: Vec<(&str, String)> = vec![
            ("Mode", summary.mode.to_string()),
            ("Duration", format!("{}s", summary.duration_secs)),
            ("Observed", metrics.observed_total.to_string()),
            ("Merged", metrics.merged_total.to_string()),
            ("Expired", metrics.expired_total.to_string()),
            ("Strikes", metrics.total_strikes.to_string()),
            (
                "Won",
                format!("{} ({:.1}%)", metrics.successes, metrics.success_rate() * 100.0),
            ),
            ("Requeued", summary.orchestrator.requeued.to_string()),
            ("Exhausted", summary.orchestrator.exhausted.to_string()),
            ("No agents", metrics.no_agents_total.to_string()),
            ("Circuit rejected", metrics.circuit_rejected_total.to_string()),
            ("Avg strike", format!("{:.0}ms", metrics.avg_response_time_ms)),
            ("Fastest strike", fastest),
            (
                "Attempts",
                format!(
                    "{} ok / {} failed / {} blocked / {} timeout / {} cancelled",
                    metrics.attempts.success,
                    metrics.attempts.failure,
                    metrics.attempts.blocked,
                    metrics.attempts.timeout,
                    metrics.attempts.cancelled
                ),
            ),
            ("Timing pattern", summary.timing.pattern.to_string()),
            ("Delay scale", format!("{:.2}", summary.timing.delay_scale)),
            ("Still queued", summary.scheduler.queued.to_string()),
        ];

        for (name, value) in rows {
            table.add_row(vec![Cell::new(name), Cell::new(value)]);
        }
        table.to_string()
    }

    /// Per-platform counters next to circuit state
    pub fn format_sources(&self, metrics: &StrikeMetrics, circuits: &[CircuitStats]) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            self.header("Platform"),
            self.header("Observed"),
            self.header("Strikes"),
            self.header("Wins"),
            self.header("Rate/min"),
            self.header("Circuit"),
            self.header("Opened"),
        ]);

        for platform in Platform::ALL {
            let stats = metrics.per_source.get(&platform).cloned().unwrap_or_default();
            let circuit = circuits.iter().find(|c| c.source == platform);
            let state = circuit.map_or("closed", |c| c.state.as_str());

            let state_cell = if self.use_colors {
                Cell::new(state).fg(circuit_color(state))
            } else {
                Cell::new(state)
            };

            table.add_row(vec![
                Cell::new(platform.as_str()),
                Cell::new(stats.observed),
                Cell::new(stats.strikes),
                Cell::new(stats.wins),
                Cell::new(format!("{:.1}", stats.recent_rate_per_min)),
                state_cell,
                Cell::new(circuit.map_or(0, |c| c.open_count)),
            ]);
        }
        table.to_string()
    }

    /// Agent pool with wins and cooldowns
    pub fn format_agents(&self, agents: &[Agent], metrics: &StrikeMetrics) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            self.header("Agent"),
            self.header("Tier"),
            self.header("Identity"),
            self.header("Wins"),
            self.header("Attempts"),
            self.header("Cooling until"),
        ]);

        for agent in agents {
            let attempts: u32 = agent.platform_stats.values().map(|s| s.attempts).sum();
            let wins = metrics
                .per_agent_win_count
                .get(&agent.agent_id)
                .copied()
                .unwrap_or(0);
            let cooldown = agent
                .cooldown_until
                .map_or_else(|| "-".to_string(), |t| t.format("%H:%M:%S").to_string());
            let identity = truncate_text(
                &format!("{}/{}/{}", agent.identity.browser, agent.identity.os, agent.identity.locale),
                28,
            );

            let wins_cell = if self.use_colors && wins > 0 {
                Cell::new(wins).fg(Color::Green)
            } else {
                Cell::new(wins)
            };

            table.add_row(vec![
                Cell::new(&agent.agent_id),
                Cell::new(agent.quality_tier.to_string()),
                Cell::new(identity),
                wins_cell,
                Cell::new(attempts),
                Cell::new(cooldown),
            ]);
        }
        table.to_string()
    }

    fn header(&self, name: &str) -> Cell {
        Cell::new(name).add_attribute(Attribute::Bold)
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(width as u16);
        }

        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn circuit_color(state: &str) -> Color {
    match state {
        "open" => Color::Red,
        "half_open" => Color::Yellow,
        _ => Color::Green,
    }
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
