//! Screenshot artifacts: scenario checkpoints and failure diagnostics

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::driver::BrowserDriver;
use crate::error::CaptureError;
use crate::session::Session;

/// Label used for the screenshot taken when a scenario fails
pub const FAILURE_LABEL: &str = "failure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Checkpoint,
    Failure,
}

/// A stored screenshot and what produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticArtifact {
    pub scenario: String,
    pub label: String,
    pub step_index: usize,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub sha256: String,
}

/// Writes screenshots to `<dir>/<scenario>-<label>.png`
#[derive(Debug, Clone)]
pub struct DiagnosticCapture {
    dir: PathBuf,
    full_page: bool,
}

impl DiagnosticCapture {
    pub fn new(dir: impl Into<PathBuf>, full_page: bool) -> Self {
        Self {
            dir: dir.into(),
            full_page,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, scenario: &str, label: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.png", sanitize(scenario), sanitize(label)))
    }

    /// Checkpoint screenshot; errors fail the calling step
    pub async fn checkpoint(
        &self,
        session: &Session,
        scenario: &str,
        label: &str,
        step_index: usize,
        full_page: Option<bool>,
    ) -> Result<DiagnosticArtifact, CaptureError> {
        self.capture(
            session,
            scenario,
            label,
            step_index,
            ArtifactKind::Checkpoint,
            full_page.unwrap_or(self.full_page),
        )
        .await
    }

    /// Best-effort screenshot from a failure handler; errors are logged and
    /// never replace the failure being diagnosed
    pub async fn on_failure(&self, session: &Session, scenario: &str, step_index: usize) -> Option<DiagnosticArtifact> {
        match self
            .capture(session, scenario, FAILURE_LABEL, step_index, ArtifactKind::Failure, true)
            .await
        {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                error!("Could not capture failure screenshot for '{}': {}", scenario, e);
                None
            }
        }
    }

    async fn capture(
        &self,
        session: &Session,
        scenario: &str,
        label: &str,
        step_index: usize,
        kind: ArtifactKind,
        full_page: bool,
    ) -> Result<DiagnosticArtifact, CaptureError> {
        let bytes = session
            .driver()
            .screenshot(session.page(), full_page)
            .await
            .map_err(CaptureError::Screenshot)?;

        let image = image::load_from_memory(&bytes)?;
        let sha256 = hex::encode(Sha256::digest(&bytes));

        std::fs::create_dir_all(&self.dir)?;
        let path = self.artifact_path(scenario, label);
        std::fs::write(&path, &bytes)?;

        info!("Screenshot saved: {}", path.display());

        Ok(DiagnosticArtifact {
            scenario: scenario.to_string(),
            label: label.to_string(),
            step_index,
            kind,
            path,
            captured_at: Utc::now(),
            width: image.width(),
            height: image.height(),
            sha256,
        })
    }
}

/// Keep file names portable
fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
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
    use crate::spec::{LoadState, ViewportSpec};

    struct Page;

    impl FixtureApp for Page {
        fn render(&self, _page: &FixturePage) -> Vec<FixtureNode> {
            vec![FixtureNode::new("title").text("Panda Jungle Gym")]
        }
    }

    async fn setup() -> (Arc<FixtureDriver>, SessionManager, Session) {
        let driver = Arc::new(FixtureDriver::new(Page));
        let manager = SessionManager::new(driver.clone());
        let session = manager.acquire(ViewportSpec::MOBILE, &StorageWrites::new()).await.unwrap();
        driver.goto(session.page(), "http://app.test/", LoadState::Load, 1000).await.unwrap();
        (driver, manager, session)
    }

    #[test]
    fn test_artifact_path() {
        let capture = DiagnosticCapture::new("/tmp/out", false);
        assert_eq!(
            capture.artifact_path("points xp/history", "xp_history"),
            PathBuf::from("/tmp/out/points_xp_history-xp_history.png")
        );
        assert_eq!(capture.artifact_path("", "x"), PathBuf::from("/tmp/out/unnamed-x.png"));
    }

    #[tokio::test]
    async fn test_checkpoint_records_metadata() {
        let (_driver, _manager, session) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let capture = DiagnosticCapture::new(dir.path(), false);

        let artifact = capture.checkpoint(&session, "landing", "landing_page", 2, None).await.unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Checkpoint);
        assert_eq!((artifact.width, artifact.height), (375, 812));
        assert_eq!(artifact.sha256.len(), 64);
        assert_eq!(artifact.path, dir.path().join("landing-landing_page.png"));
        assert!(artifact.path.exists());
    }

    #[tokio::test]
    async fn test_checkpoint_surfaces_errors_failure_swallows_them() {
        let (driver, _manager, session) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let capture = DiagnosticCapture::new(dir.path(), false);

        driver.fail_screenshots(true);
        let err = capture.checkpoint(&session, "s", "cp", 0, None).await.unwrap_err();
        assert!(matches!(err, CaptureError::Screenshot(_)));
        assert!(capture.on_failure(&session, "s", 0).await.is_none());

        driver.fail_screenshots(false);
        driver.corrupt_screenshots(true);
        let err = capture.checkpoint(&session, "s", "cp", 0, None).await.unwrap_err();
        assert!(matches!(err, CaptureError::Encoding(_)));
    }

    #[tokio::test]
    async fn test_rerun_overwrites() {
        let (_driver, _manager, session) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let capture = DiagnosticCapture::new(dir.path(), false);

        capture.checkpoint(&session, "s", "cp", 0, None).await.unwrap();
        capture.checkpoint(&session, "s", "cp", 0, Some(true)).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
