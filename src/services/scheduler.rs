use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info};

use super::matching::MatchingEngine;

/// Периодически расширяет диапазон поиска у всех pending-запросов.
#[derive(Clone)]
pub struct SearchRangeExpander {
    matching: MatchingEngine,
    interval: Duration,
}

impl SearchRangeExpander {
    pub fn new(matching: MatchingEngine, interval: Duration) -> Self {
        Self { matching, interval }
    }

    /// Один проход. Возвращает число расширенных запросов.
    pub async fn run_once(&self) -> usize {
        self.run_once_at(Utc::now()).await
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> usize {
        match self.matching.expand_all_pending(now).await {
            Ok(expanded) => {
                if expanded > 0 {
                    info!(expanded, "search ranges expanded");
                } else {
                    debug!("no search ranges to expand");
                }
                expanded
            }
            Err(e) => {
                error!(error = %e, "search range sweep failed");
                0
            }
        }
    }

    /// Бесконечный цикл для фоновой задачи.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "search range expander started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }
}
