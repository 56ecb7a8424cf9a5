//! Session lifecycle controller.
//!
//! Owns the sandbox identity, credential, expiry, and the state machine
//! `Inactive → Starting → Active → (Expired | Inactive)`. The controller
//! performs no network I/O itself: each `begin_*` validates the
//! transition and hands back the request for the caller to dispatch, and
//! the matching `finish_*` applies the outcome when it arrives. Every
//! failure is terminal to the attempted operation and is surfaced as
//! transcript lines; nothing here retries automatically and nothing is
//! fatal to the process; a failed session restarts from `Inactive`.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::backend::{ExtendResponse, Resources, StartRequest, StartResponse};
use crate::config::Identity;
use crate::error::BackendError;
use crate::format::format_duration;
use crate::record::{RecordStore, SessionRecord};
use crate::transcript::{LineKind, Transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Inactive,
    Starting,
    Active,
    Expired,
}

/// Client-side record of one sandbox allocation.
#[derive(Debug, Clone)]
pub struct Session {
    pub sandbox_id: String,
    pub credential: String,
    pub os_label: String,
    pub resources: Resources,
    pub expires_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

pub struct SessionController {
    store: RecordStore,
    identity: Option<Identity>,
    session_hours: u32,
    session: Option<Session>,
    status: SessionStatus,
    /// Bumped on every stop/expiry; responses tagged with an older epoch
    /// are discarded instead of rendered.
    epoch: u64,
    commands_executed: u64,
}

impl SessionController {
    pub fn new(store: RecordStore, identity: Option<Identity>, session_hours: u32) -> Self {
        Self {
            store,
            identity,
            session_hours,
            session: None,
            status: SessionStatus::Inactive,
            epoch: 0,
            commands_executed: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn sandbox_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.sandbox_id.as_str())
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn commands_executed(&self) -> u64 {
        self.commands_executed
    }

    /// Called by the pipeline whenever a dispatched command completes.
    pub fn record_command(&mut self) {
        self.commands_executed += 1;
    }

    /// Time left before forced expiry, clamped to zero.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.session
            .as_ref()
            .map(|s| (s.expires_at - now).max(Duration::zero()))
    }

    /// Validate a provisioning attempt. Only meaningful from `Inactive`;
    /// requires a signed-in identity before producing any request at all.
    pub fn begin_start(&mut self, t: &mut Transcript) -> Option<StartRequest> {
        if self.status != SessionStatus::Inactive {
            t.push(LineKind::Error, "a session is already active");
            return None;
        }
        let Some(identity) = self.identity.clone() else {
            t.push(
                LineKind::Error,
                "authentication required: sign in before starting a sandbox",
            );
            return None;
        };
        self.status = SessionStatus::Starting;
        Some(StartRequest {
            user_id: identity.user_id,
            display_name: identity.display_name,
            duration_seconds: self.session_hours as u64 * 3600,
        })
    }

    /// Apply the provisioning outcome. Success populates the session,
    /// writes the record, and emits the welcome block; failure leaves
    /// `Inactive` with one Error line. No automatic retry.
    pub fn finish_start(
        &mut self,
        result: Result<StartResponse, BackendError>,
        t: &mut Transcript,
    ) {
        if self.status != SessionStatus::Starting {
            debug!("discarding start response; no start in progress");
            return;
        }
        match result {
            Ok(resp) => {
                info!(sandbox_id = %resp.sandbox_id, expires_at = %resp.expires_at, "sandbox started");
                let now = Utc::now();
                let session = Session {
                    sandbox_id: resp.sandbox_id,
                    credential: resp.credential,
                    os_label: resp.os_label,
                    resources: resp.resources,
                    expires_at: resp.expires_at,
                    started_at: now,
                };
                self.persist(&session);
                t.push(LineKind::Success, format!("sandbox ready: {}", session.sandbox_id));
                t.push(LineKind::Output, format!("root password: {}", session.credential));
                t.push(
                    LineKind::Output,
                    format!(
                        "{} ({} ram, {} storage, {})",
                        session.os_label,
                        session.resources.ram,
                        session.resources.storage,
                        session.resources.cpu
                    ),
                );
                t.push(
                    LineKind::Output,
                    format!("expires in {}", format_duration(session.expires_at - now)),
                );
                t.push(
                    LineKind::Output,
                    "type a command and press enter; 'exit' ends the session, 'clear' wipes the screen",
                );
                self.session = Some(session);
                self.status = SessionStatus::Active;
            }
            Err(e) => {
                warn!(error = %e, "sandbox start failed");
                self.status = SessionStatus::Inactive;
                t.push(LineKind::Error, format!("could not start a sandbox: {}", e));
            }
        }
    }

    /// Validate an extension attempt; Active-only. Returns the sandbox to
    /// extend.
    pub fn begin_extend(&mut self, t: &mut Transcript) -> Option<String> {
        if self.status != SessionStatus::Active {
            t.push(LineKind::Error, "no active sandbox to extend");
            return None;
        }
        self.session.as_ref().map(|s| s.sandbox_id.clone())
    }

    /// Apply an extension outcome. Success updates the expiry in memory
    /// and on disk; failure leaves everything unchanged.
    pub fn finish_extend(
        &mut self,
        result: Result<ExtendResponse, BackendError>,
        t: &mut Transcript,
    ) {
        if self.status != SessionStatus::Active {
            debug!("discarding extend response; session no longer active");
            return;
        }
        match result {
            Ok(resp) if resp.success => {
                let Some(expires_at) = resp.expires_at else {
                    t.push(LineKind::Error, "backend confirmed the extension but sent no expiry");
                    return;
                };
                if let Some(session) = self.session.as_mut() {
                    session.expires_at = expires_at;
                }
                if let Some(session) = self.session.as_ref() {
                    self.persist(session);
                }
                info!(%expires_at, "session extended");
                t.push(
                    LineKind::Success,
                    format!(
                        "session extended: now expires in {} (at {})",
                        format_duration(expires_at - Utc::now()),
                        expires_at.to_rfc3339()
                    ),
                );
            }
            Ok(resp) => {
                t.push(
                    LineKind::Error,
                    format!(
                        "could not extend the session: {}",
                        resp.message.unwrap_or_else(|| "backend refused".into())
                    ),
                );
            }
            Err(e) => {
                warn!(error = %e, "extend failed");
                t.push(LineKind::Error, format!("could not extend the session: {}", e));
            }
        }
    }

    /// Tear the session down locally and hand back the sandbox for a
    /// best-effort teardown request. Local cleanup never waits on the
    /// network, so the client never keeps believing a dead sandbox is
    /// alive.
    pub fn begin_stop(&mut self, t: &mut Transcript) -> Option<String> {
        let Some(session) = self.session.take() else {
            debug!("stop with no session; nothing to do");
            return None;
        };
        let elapsed = Utc::now() - session.started_at;
        t.push(
            LineKind::Output,
            format!(
                "session summary: {} command{} in {}",
                self.commands_executed,
                if self.commands_executed == 1 { "" } else { "s" },
                format_duration(elapsed)
            ),
        );
        info!(sandbox_id = %session.sandbox_id, commands = self.commands_executed, "session ended");
        self.clear_local();
        Some(session.sandbox_id)
    }

    /// Apply the teardown outcome. Local state is already cleared; a
    /// failure only warrants a note that the sandbox will expire on its
    /// own.
    pub fn finish_stop(&mut self, result: Result<(), BackendError>, t: &mut Transcript) {
        if let Err(e) = result {
            warn!(error = %e, "teardown request failed");
            t.push(
                LineKind::Output,
                "warning: could not reach the backend to tear down the sandbox; it will expire on its own",
            );
        }
    }

    /// One-second countdown tick. At zero, the controller performs the
    /// local stop sequence, announces the forced expiry, and hands back
    /// the sandbox to tear down; this must win any race with an in-flight
    /// execution, which the epoch bump guarantees.
    pub fn tick(&mut self, now: DateTime<Utc>, t: &mut Transcript) -> Option<String> {
        if self.status != SessionStatus::Active {
            return None;
        }
        let expired = self
            .session
            .as_ref()
            .map(|s| now >= s.expires_at)
            .unwrap_or(false);
        if !expired {
            return None;
        }
        info!("session expired");
        self.status = SessionStatus::Expired;
        t.push(
            LineKind::Error,
            "session expired: the sandbox has been destroyed",
        );
        self.begin_stop(t)
    }

    /// Re-attach to a sandbox recorded by a previous run. A record whose
    /// expiry has passed is deleted silently.
    pub fn restore(&mut self, now: DateTime<Utc>, t: &mut Transcript) {
        let Some(record) = self.store.load() else {
            return;
        };
        if record.expires_at <= now {
            debug!(sandbox_id = %record.sandbox_id, "dropping stale session record");
            self.store.delete();
            return;
        }
        info!(sandbox_id = %record.sandbox_id, "restoring session from record");
        t.push(
            LineKind::Success,
            format!(
                "session restored: {}, expires in {}",
                record.sandbox_id,
                format_duration(record.expires_at - now)
            ),
        );
        self.session = Some(Session {
            sandbox_id: record.sandbox_id,
            credential: String::new(),
            os_label: String::new(),
            resources: Resources::default(),
            expires_at: record.expires_at,
            started_at: now,
        });
        self.status = SessionStatus::Active;
    }

    fn persist(&self, session: &Session) {
        let record = SessionRecord {
            sandbox_id: session.sandbox_id.clone(),
            expires_at: session.expires_at,
        };
        if let Err(e) = self.store.save(&record) {
            warn!(error = %e, "could not persist the session record");
        }
    }

    fn clear_local(&mut self) {
        self.session = None;
        self.status = SessionStatus::Inactive;
        self.epoch += 1;
        self.commands_executed = 0;
        self.store.delete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;

    fn identity() -> Identity {
        Identity {
            user_id: "u-1".into(),
            display_name: "Tester".into(),
        }
    }

    fn controller(dir: &tempfile::TempDir, identity: Option<Identity>) -> SessionController {
        SessionController::new(
            RecordStore::new(dir.path().join("session.json")),
            identity,
            2,
        )
    }

    fn started(dir: &tempfile::TempDir) -> (SessionController, Transcript) {
        let mut ctrl = controller(dir, Some(identity()));
        let mut t = Transcript::default();
        assert!(ctrl.begin_start(&mut t).is_some());
        ctrl.finish_start(Ok(MockBackend::ok_start(3600)), &mut t);
        assert_eq!(ctrl.status(), SessionStatus::Active);
        (ctrl, t)
    }

    fn texts(t: &Transcript) -> Vec<String> {
        t.lines().iter().map(|l| l.text.clone()).collect()
    }

    #[test]
    fn start_without_identity_produces_no_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(&dir, None);
        let mut t = Transcript::default();

        assert!(ctrl.begin_start(&mut t).is_none());

        assert_eq!(ctrl.status(), SessionStatus::Inactive);
        assert!(t.lines()[0].text.contains("authentication required"));
    }

    #[test]
    fn start_populates_the_session_and_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(&dir, Some(identity()));
        let mut t = Transcript::default();

        let req = ctrl.begin_start(&mut t).unwrap();
        assert_eq!(req.user_id, "u-1");
        assert_eq!(req.duration_seconds, 2 * 3600);
        assert_eq!(ctrl.status(), SessionStatus::Starting);

        ctrl.finish_start(Ok(MockBackend::ok_start(3600)), &mut t);

        assert_eq!(ctrl.status(), SessionStatus::Active);
        assert_eq!(ctrl.sandbox_id(), Some("sbx-1234"));
        let all = texts(&t).join("\n");
        assert!(all.contains("sbx-1234"));
        assert!(all.contains("hunter2"));

        let record = RecordStore::new(dir.path().join("session.json")).load().unwrap();
        assert_eq!(record.sandbox_id, "sbx-1234");
    }

    #[test]
    fn failed_start_stays_inactive_with_one_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(&dir, Some(identity()));
        let mut t = Transcript::default();

        ctrl.begin_start(&mut t).unwrap();
        ctrl.finish_start(
            Err(BackendError::Rejected {
                status: 503,
                message: "at capacity".into(),
            }),
            &mut t,
        );

        assert_eq!(ctrl.status(), SessionStatus::Inactive);
        assert_eq!(t.len(), 1);
        assert_eq!(t.lines()[0].kind, LineKind::Error);
        assert!(t.lines()[0].text.contains("at capacity"));
    }

    #[test]
    fn extend_updates_expiry_in_memory_and_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctrl, mut t) = started(&dir);
        let new_expiry = Utc::now() + Duration::hours(5);

        assert_eq!(ctrl.begin_extend(&mut t), Some("sbx-1234".to_string()));
        ctrl.finish_extend(
            Ok(ExtendResponse {
                success: true,
                expires_at: Some(new_expiry),
                message: None,
            }),
            &mut t,
        );

        assert_eq!(ctrl.session().unwrap().expires_at, new_expiry);
        let record = RecordStore::new(dir.path().join("session.json")).load().unwrap();
        assert_eq!(record.expires_at, new_expiry);
        assert!(texts(&t).iter().any(|l| l.contains("session extended")));
    }

    #[test]
    fn failed_extend_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctrl, mut t) = started(&dir);
        let before = ctrl.session().unwrap().expires_at;

        ctrl.begin_extend(&mut t).unwrap();
        ctrl.finish_extend(
            Ok(ExtendResponse {
                success: false,
                expires_at: None,
                message: Some("quota exceeded".into()),
            }),
            &mut t,
        );

        assert_eq!(ctrl.status(), SessionStatus::Active);
        assert_eq!(ctrl.session().unwrap().expires_at, before);
        assert!(texts(&t).iter().any(|l| l.contains("quota exceeded")));
    }

    #[test]
    fn extend_without_a_session_is_a_local_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(&dir, Some(identity()));
        let mut t = Transcript::default();

        assert!(ctrl.begin_extend(&mut t).is_none());
        assert!(t.lines()[0].text.contains("no active sandbox"));
    }

    #[test]
    fn stop_cleans_up_locally_before_any_teardown_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctrl, mut t) = started(&dir);
        let epoch_before = ctrl.epoch();

        let target = ctrl.begin_stop(&mut t);
        assert_eq!(target, Some("sbx-1234".to_string()));

        // Local state is already gone, whatever the teardown call does.
        assert_eq!(ctrl.status(), SessionStatus::Inactive);
        assert!(ctrl.session().is_none());
        assert_eq!(ctrl.epoch(), epoch_before + 1);
        assert!(RecordStore::new(dir.path().join("session.json")).load().is_none());
        assert!(texts(&t).iter().any(|l| l.contains("session summary")));

        ctrl.finish_stop(
            Err(BackendError::Rejected {
                status: 503,
                message: "backend unreachable".into(),
            }),
            &mut t,
        );
        assert!(texts(&t).iter().any(|l| l.starts_with("warning")));
        assert_eq!(ctrl.status(), SessionStatus::Inactive);
    }

    #[test]
    fn countdown_reaching_zero_forces_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctrl, mut t) = started(&dir);

        assert!(ctrl.tick(Utc::now(), &mut t).is_none());
        assert_eq!(ctrl.status(), SessionStatus::Active);

        let target = ctrl.tick(Utc::now() + Duration::hours(2), &mut t);
        assert_eq!(target, Some("sbx-1234".to_string()));
        assert_eq!(ctrl.status(), SessionStatus::Inactive);
        assert!(texts(&t).iter().any(|l| l.contains("session expired")));
    }

    #[test]
    fn restore_accepts_a_future_record_and_drops_a_stale_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("session.json"));
        let now = Utc::now();

        store
            .save(&SessionRecord {
                sandbox_id: "sbx-live".into(),
                expires_at: now + Duration::seconds(10),
            })
            .unwrap();
        let mut ctrl = controller(&dir, Some(identity()));
        let mut t = Transcript::default();
        ctrl.restore(now, &mut t);
        assert_eq!(ctrl.status(), SessionStatus::Active);
        assert_eq!(ctrl.sandbox_id(), Some("sbx-live"));
        assert!(t.lines()[0].text.contains("session restored"));

        store
            .save(&SessionRecord {
                sandbox_id: "sbx-dead".into(),
                expires_at: now - Duration::seconds(10),
            })
            .unwrap();
        let mut ctrl = controller(&dir, Some(identity()));
        let mut t = Transcript::default();
        ctrl.restore(now, &mut t);
        assert_eq!(ctrl.status(), SessionStatus::Inactive);
        assert!(t.is_empty());
        assert!(store.load().is_none());
    }
}
