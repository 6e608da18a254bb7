//! Resolving logical elements through ordered locator candidates

use std::fmt;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::driver::{BrowserDriver, ElementQuery, PageId};
use crate::error::{FailedAttempt, LocateError};
use crate::session::Session;
use crate::spec::{Candidate, LocatorSpec};

/// What happened to a single candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Exactly one visible element (or the deliberate nth pick)
    Resolved(ElementHandle),

    /// More than one visible element and no pick declared
    Ambiguous { matches: usize },

    /// Nothing visible within the candidate's timeout
    Timeout { waited_ms: u64 },

    /// The driver could not evaluate the candidate
    Failed { reason: String },

    /// Scenario ceiling already spent; checked once without waiting
    Skipped,
}

impl fmt::Display for CandidateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateOutcome::Resolved(handle) => write!(f, "resolved ({})", handle.query),
            CandidateOutcome::Ambiguous { matches } => write!(f, "ambiguous: {} visible matches", matches),
            CandidateOutcome::Timeout { waited_ms } => write!(f, "no visible match after {} ms", waited_ms),
            CandidateOutcome::Failed { reason } => write!(f, "failed: {}", reason),
            CandidateOutcome::Skipped => write!(f, "skipped: wait ceiling reached"),
        }
    }
}

/// A resolved element, addressed by the query that found it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub page: PageId,
    pub query: ElementQuery,
    /// Logical name of the locator
    pub target: String,
    /// Index into the declared candidates
    pub candidate_index: usize,
}

/// Waits for locator candidates to resolve
#[derive(Debug, Clone)]
pub struct Locator {
    default_timeout: Duration,
    poll_interval: Duration,
}

impl Default for Locator {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_millis(100))
    }
}

impl Locator {
    pub fn new(default_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            default_timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn resolve(&self, session: &Session, spec: &LocatorSpec) -> Result<ElementHandle, LocateError> {
        self.resolve_with(session, spec, None, None).await
    }

    /// Try candidates in priority order; the first one that settles on a
    /// single visible element wins and later candidates are never tried.
    ///
    /// `default_timeout` overrides the locator default for candidates
    /// without their own timeout. `ceiling` is the locate time the scenario
    /// has left; once it is spent candidates get a single check each.
    pub async fn resolve_with(
        &self,
        session: &Session,
        spec: &LocatorSpec,
        default_timeout: Option<Duration>,
        ceiling: Option<Duration>,
    ) -> Result<ElementHandle, LocateError> {
        let deadline = ceiling.map(|c| Instant::now() + c);
        let mut attempts = Vec::new();

        for candidate in spec.ordered() {
            let candidate_index = spec
                .candidates
                .iter()
                .position(|c| std::ptr::eq(c, candidate))
                .unwrap_or_default();

            let outcome = match self.budget(candidate, default_timeout, deadline) {
                Some(budget) => self.try_candidate(session, spec, candidate, candidate_index, budget).await,
                None => match self.try_candidate(session, spec, candidate, candidate_index, Duration::ZERO).await {
                    CandidateOutcome::Timeout { .. } => CandidateOutcome::Skipped,
                    outcome => outcome,
                },
            };

            match outcome {
                CandidateOutcome::Resolved(handle) => {
                    debug!("'{}' resolved by {}", spec.name, candidate);
                    return Ok(handle);
                }
                outcome => {
                    debug!("'{}': {} -> {}", spec.name, candidate, outcome);
                    attempts.push(FailedAttempt {
                        candidate: candidate.clone(),
                        outcome,
                    });
                }
            }
        }

        Err(LocateError {
            target: spec.name.clone(),
            attempts,
        })
    }

    /// Wait until no candidate has a visible match
    pub async fn wait_hidden(&self, session: &Session, spec: &LocatorSpec, timeout: Duration) -> Result<(), u64> {
        let start = Instant::now();
        loop {
            let mut any_visible = false;
            for candidate in &spec.candidates {
                let query = ElementQuery::new(candidate.strategy.clone());
                match session.driver().count_visible(session.page(), &query).await {
                    Ok(0) => {}
                    Ok(_) | Err(_) => {
                        any_visible = true;
                        break;
                    }
                }
            }
            if !any_visible {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(start.elapsed().as_millis() as u64);
            }
            sleep(self.poll_interval).await;
        }
    }

    fn budget(&self, candidate: &Candidate, default_timeout: Option<Duration>, deadline: Option<Instant>) -> Option<Duration> {
        let own = candidate
            .timeout()
            .or(default_timeout)
            .unwrap_or(self.default_timeout);

        match deadline {
            None => Some(own),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    None
                } else {
                    Some(own.min(remaining))
                }
            }
        }
    }

    async fn try_candidate(
        &self,
        session: &Session,
        spec: &LocatorSpec,
        candidate: &Candidate,
        candidate_index: usize,
        budget: Duration,
    ) -> CandidateOutcome {
        let query = ElementQuery {
            strategy: candidate.strategy.clone(),
            nth: candidate.nth,
        };
        let start = Instant::now();

        loop {
            match session.driver().count_visible(session.page(), &query).await {
                Ok(count) if count > 0 => {
                    trace!("{}: {} visible", query, count);
                    return match query.pick_index(count) {
                        Some(_) => CandidateOutcome::Resolved(ElementHandle {
                            page: session.page(),
                            query,
                            target: spec.name.clone(),
                            candidate_index,
                        }),
                        None if candidate.nth.is_none() => CandidateOutcome::Ambiguous { matches: count },
                        // Pick out of range: keep waiting for more matches
                        None => {
                            if start.elapsed() >= budget {
                                return CandidateOutcome::Timeout {
                                    waited_ms: start.elapsed().as_millis() as u64,
                                };
                            }
                            sleep(self.poll_interval).await;
                            continue;
                        }
                    };
                }
                Ok(_) => {}
                Err(e) => return CandidateOutcome::Failed { reason: e.to_string() },
            }

            if start.elapsed() >= budget {
                return CandidateOutcome::Timeout {
                    waited_ms: start.elapsed().as_millis() as u64,
                };
            }
            sleep(self.poll_interval.min(budget)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::driver::fixture::{FixtureApp, FixtureNode, FixturePage};
    use crate::driver::FixtureDriver;
    use crate::mock::StorageWrites;
    use crate::session::SessionManager;
    use crate::spec::{LoadState, Strategy, ViewportSpec};

    struct Dock;

    impl FixtureApp for Dock {
        fn render(&self, _page: &FixturePage) -> Vec<FixtureNode> {
            vec![
                FixtureNode::new("home").label("Home").css(".dock button"),
                FixtureNode::new("tribe").label("Tribe").text("Tribe").css(".dock button"),
                FixtureNode::new("stats").label("Stats").css(".dock button"),
                FixtureNode::new("ghost").text("Ghost").hidden(),
                FixtureNode::new("slow").text("Slow").appears_after(Duration::from_millis(150)),
            ]
        }
    }

    async fn session() -> (SessionManager, Session) {
        let driver = Arc::new(FixtureDriver::new(Dock));
        let manager = SessionManager::new(driver);
        let session = manager.acquire(ViewportSpec::MOBILE, &StorageWrites::new()).await.unwrap();
        session
            .driver()
            .goto(session.page(), "http://app.test/", LoadState::Load, 1000)
            .await
            .unwrap();
        (manager, session)
    }

    fn fast() -> Locator {
        Locator::new(Duration::from_millis(60), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_first_resolving_candidate_wins() {
        let (_manager, session) = session().await;
        let spec = LocatorSpec::new("tribe tab").css(".dock button").nth(1).label("Tribe").text("Tribe");

        let handle = fast().resolve(&session, &spec).await.unwrap();
        assert_eq!(handle.candidate_index, 2);
        assert!(matches!(handle.query.strategy, Strategy::Text { .. }));
    }

    #[tokio::test]
    async fn test_ambiguous_falls_through_to_next() {
        let (_manager, session) = session().await;
        let spec = LocatorSpec::new("tab").css(".dock button").label("Stats");

        let handle = fast().resolve(&session, &spec).await.unwrap();
        assert_eq!(handle.query.strategy, Strategy::Label { label: "Stats".to_string() });
    }

    #[tokio::test]
    async fn test_nth_pick_is_deliberate() {
        let (_manager, session) = session().await;
        let spec = LocatorSpec::new("home").css(".dock button").nth(0);
        let handle = fast().resolve(&session, &spec).await.unwrap();
        assert_eq!(handle.query.nth, Some(0));
    }

    #[tokio::test]
    async fn test_error_lists_every_attempt() {
        let (_manager, session) = session().await;
        let spec = LocatorSpec::new("missing").text("Ghost").css(".dock button");

        let err = fast().resolve(&session, &spec).await.unwrap_err();
        assert_eq!(err.attempts.len(), 2);
        assert!(matches!(err.attempts[0].outcome, CandidateOutcome::Timeout { .. }));
        assert_eq!(err.attempts[1].outcome, CandidateOutcome::Ambiguous { matches: 3 });

        let message = err.to_string();
        assert!(message.contains("text=\"Ghost\""));
        assert!(message.contains("ambiguous: 3 visible matches"));
    }

    #[tokio::test]
    async fn test_waits_for_late_element() {
        let (_manager, session) = session().await;
        let spec = LocatorSpec::new("slow").text("Slow").timeout(Duration::from_secs(2));
        assert!(fast().resolve(&session, &spec).await.is_ok());
    }

    #[tokio::test]
    async fn test_ceiling_skips_remaining_candidates() {
        let (_manager, session) = session().await;
        let spec = LocatorSpec::new("never")
            .text("Nope")
            .timeout(Duration::from_millis(200))
            .label("Nope");

        let err = fast()
            .resolve_with(&session, &spec, None, Some(Duration::from_millis(80)))
            .await
            .unwrap_err();
        assert!(matches!(err.attempts[0].outcome, CandidateOutcome::Timeout { waited_ms } if waited_ms < 200));
        assert_eq!(err.attempts[1].outcome, CandidateOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_spent_ceiling_still_checks_once() {
        let (_manager, session) = session().await;
        let spec = LocatorSpec::new("tribe").css(".missing").text("Tribe");

        let handle = fast()
            .resolve_with(&session, &spec, None, Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(matches!(handle.query.strategy, Strategy::Text { .. }));
    }

    #[tokio::test]
    async fn test_wait_hidden() {
        let (_manager, session) = session().await;
        let locator = fast();
        assert!(locator
            .wait_hidden(&session, &LocatorSpec::new("ghost").text("Ghost"), Duration::from_millis(50))
            .await
            .is_ok());
        assert!(locator
            .wait_hidden(&session, &LocatorSpec::new("tribe").label("Tribe"), Duration::from_millis(50))
            .await
            .is_err());
    }
}
