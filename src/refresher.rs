use std::time::Instant;

use tracing::{error, info};

use crate::db::Sink;

/// Aggregate views rebuilt after each batch, in refresh order.
pub const DEFAULT_VIEWS: [&str; 4] = ["hour_window", "day_window", "week_window", "month_window"];

const SAVEPOINT: &str = "density_view_refresh";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
    pub committed: bool,
}

/// Best-effort refresh of the materialized views. Failures are logged, never returned.
pub struct ViewRefresher<'a, S: Sink> {
    sink: &'a mut S,
}

impl<'a, S: Sink> ViewRefresher<'a, S> {
    pub fn new(sink: &'a mut S) -> Self {
        Self { sink }
    }

    pub async fn refresh(&mut self, views: &[String]) -> RefreshReport {
        let mut report = RefreshReport::default();
        if views.is_empty() {
            return report;
        }

        let start = Instant::now();
        if let Err(err) = self.sink.begin().await {
            error!(
                stage = "refresh",
                event = "refresh.begin",
                result = "fail",
                error = %err,
                "failed to open transaction for view refresh"
            );
            report.failed = views.to_vec();
            return report;
        }

        for view in views {
            match self.refresh_one(view).await {
                Ok(()) => report.refreshed.push(view.clone()),
                Err(err) => {
                    error!(
                        stage = "refresh",
                        event = "refresh.view",
                        result = "fail",
                        view = %view,
                        error = %err,
                        "failed to refresh materialized view"
                    );
                    report.failed.push(view.clone());
                }
            }
        }

        match self.sink.commit().await {
            Ok(()) => report.committed = true,
            Err(err) => {
                error!(
                    stage = "refresh",
                    event = "refresh.commit",
                    result = "fail",
                    error = %err,
                    "failed to commit view refresh"
                );
                // Nothing from an uncommitted transaction took effect.
                report.refreshed.clear();
                report.failed = views.to_vec();
            }
        }

        info!(
            stage = "refresh",
            event = "refresh.end",
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            committed = report.committed,
            duration_ms = start.elapsed().as_millis(),
            "materialized view refresh finished"
        );

        report
    }

    // Each view runs under its own savepoint so one failure does not poison
    // the rest of the transaction.
    async fn refresh_one(&mut self, view: &str) -> Result<(), sqlx::Error> {
        self.sink.execute(&format!("SAVEPOINT {SAVEPOINT}")).await?;

        let statement = format!("REFRESH MATERIALIZED VIEW {}", quote_identifier(view));
        match self.sink.execute(&statement).await {
            Ok(()) => {
                self.sink
                    .execute(&format!("RELEASE SAVEPOINT {SAVEPOINT}"))
                    .await
            }
            Err(err) => {
                if let Err(restore_err) = self
                    .sink
                    .execute(&format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}"))
                    .await
                {
                    error!(
                        stage = "refresh",
                        event = "refresh.savepoint",
                        result = "fail",
                        view = %view,
                        error = %restore_err,
                        "failed to restore savepoint after view refresh error"
                    );
                }
                Err(err)
            }
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use pretty_assertions::assert_eq;

    fn views() -> Vec<String> {
        DEFAULT_VIEWS.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn refreshes_views_in_order() {
        let store = MemoryStore::new();
        let mut sink = store.sink();

        let report = ViewRefresher::new(&mut sink).refresh(&views()).await;

        assert_eq!(report.refreshed, views());
        assert!(report.failed.is_empty());
        assert!(report.committed);

        let refreshes: Vec<String> = store
            .state()
            .log
            .iter()
            .filter(|s| s.starts_with("REFRESH"))
            .cloned()
            .collect();
        assert_eq!(
            refreshes,
            vec![
                "REFRESH MATERIALIZED VIEW \"hour_window\"".to_string(),
                "REFRESH MATERIALIZED VIEW \"day_window\"".to_string(),
                "REFRESH MATERIALIZED VIEW \"week_window\"".to_string(),
                "REFRESH MATERIALIZED VIEW \"month_window\"".to_string(),
            ]
        );
        let state = store.state();
        assert_eq!(state.log.first().map(String::as_str), Some("BEGIN"));
        assert_eq!(state.log.last().map(String::as_str), Some("COMMIT"));
    }

    #[tokio::test]
    async fn one_failing_view_does_not_stop_the_rest() {
        let store = MemoryStore::new();
        store
            .state()
            .faults
            .statements
            .insert("\"day_window\"".to_string());
        let mut sink = store.sink();

        let report = ViewRefresher::new(&mut sink).refresh(&views()).await;

        assert_eq!(report.failed, vec!["day_window".to_string()]);
        assert_eq!(
            report.refreshed,
            vec![
                "hour_window".to_string(),
                "week_window".to_string(),
                "month_window".to_string()
            ]
        );
        assert!(report.committed);
        assert_eq!(store.statements_matching("ROLLBACK TO SAVEPOINT"), 1);
        assert_eq!(store.statements_matching("RELEASE SAVEPOINT"), 3);
    }

    #[tokio::test]
    async fn failed_begin_marks_every_view_failed() {
        let store = MemoryStore::new();
        store.state().faults.begin = true;
        let mut sink = store.sink();

        let report = ViewRefresher::new(&mut sink).refresh(&views()).await;

        assert_eq!(report.failed, views());
        assert!(report.refreshed.is_empty());
        assert!(!report.committed);
        assert_eq!(store.statements_matching("REFRESH"), 0);
    }

    #[tokio::test]
    async fn failed_commit_marks_every_view_failed() {
        let store = MemoryStore::new();
        store.state().faults.commit = true;
        let mut sink = store.sink();

        let report = ViewRefresher::new(&mut sink).refresh(&views()).await;

        assert!(report.refreshed.is_empty());
        assert_eq!(report.failed, views());
        assert!(!report.committed);
        assert_eq!(store.statements_matching("REFRESH MATERIALIZED VIEW"), 4);
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_identifier("hour_window"), "\"hour_window\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
