//! Roster collector: turns session events into store writes and group exits.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use rosterbot_protocol::{GroupStatus, RosterEntry, RosterResponse};
use tracing::{debug, error, info, instrument, warn};

use super::leave::LeaveGuard;
use crate::session::{SessionActions, SessionEventHandler, SessionResult};
use crate::user::{UserRecord, UserStore};

/// A roster entry whose upsert failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub jid: String,
    pub error: String,
}

/// What happened while processing one roster response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterOutcome {
    /// Jids upserted into the batch, in order.
    pub written: Vec<String>,
    /// Entries whose upsert failed.
    pub failed: Vec<EntryFailure>,
    /// Entries of a kind that is not stored.
    pub skipped: usize,
    /// Entries that could not be decoded.
    pub invalid: usize,
    /// Whether the batch commit succeeded.
    pub committed: bool,
    /// Why the batch could not be opened or committed.
    pub batch_error: Option<String>,
    /// Group left after processing.
    pub left_group: Option<String>,
}

/// Reacts to group status and roster events.
///
/// Holds no state of its own between events; every group interaction is
/// handled independently.
pub struct RosterCollector {
    store: Arc<dyn UserStore>,
    actions: Arc<dyn SessionActions>,
}

impl RosterCollector {
    pub fn new(store: Arc<dyn UserStore>, actions: Arc<dyn SessionActions>) -> Self {
        Self { store, actions }
    }

    /// Request roster info for every member of the group.
    ///
    /// Does not wait for the answer. Failures are logged and the
    /// interaction is dropped.
    #[instrument(skip_all, fields(group = %status.group.jid))]
    pub fn handle_group_status(&self, status: &GroupStatus) -> SessionResult<Vec<String>> {
        let members = unique_members(&status.group.users);
        if members.is_empty() {
            debug!("Group status carried no members");
            return Ok(members);
        }

        self.actions.request_info(&members)?;
        debug!(members = members.len(), "Requested member info");
        Ok(members)
    }

    /// Store every roster entry in one batch, then leave the originating
    /// group.
    ///
    /// The group left is the one named by the last entry that carries a
    /// group. The exit happens even when the batch fails.
    #[instrument(skip_all, fields(entries = response.entries.len()))]
    pub async fn handle_roster(&self, response: &RosterResponse) -> RosterOutcome {
        let mut leave = LeaveGuard::new(self.actions.as_ref());
        let mut outcome = RosterOutcome::default();

        let mut batch = match self.store.begin_batch().await {
            Ok(batch) => Some(batch),
            Err(e) => {
                outcome.batch_error = Some(format!("{e:#}"));
                None
            }
        };

        for entry in &response.entries {
            let user = match entry {
                RosterEntry::Roster(user) => user,
                RosterEntry::Invalid { error } => {
                    warn!(error = %error, "Ignoring undecodable roster entry");
                    outcome.invalid += 1;
                    continue;
                }
                RosterEntry::Other => {
                    outcome.skipped += 1;
                    continue;
                }
            };

            if let Some(batch) = batch.as_mut() {
                let record = UserRecord::from(user);
                match batch.upsert_user(&record).await {
                    Ok(()) => outcome.written.push(record.jid),
                    Err(e) => outcome.failed.push(EntryFailure {
                        jid: user.jid.clone(),
                        error: format!("{e:#}"),
                    }),
                }
            }

            if let Some(group_jid) = user.group_jid() {
                leave.target(group_jid);
            }
        }

        if let Some(batch) = batch {
            match batch.commit().await {
                Ok(()) => outcome.committed = true,
                Err(e) => outcome.batch_error = Some(format!("{e:#}")),
            }
        }

        log_outcome(&outcome);
        outcome.left_group = leave.fire();
        outcome
    }
}

#[async_trait]
impl SessionEventHandler for RosterCollector {
    async fn on_group_status_received(&self, status: &GroupStatus) {
        if let Err(e) = self.handle_group_status(status) {
            error!(group = %status.group.jid, error = %e, "Error requesting user info");
        }
    }

    async fn on_roster_received(&self, response: &RosterResponse) {
        self.handle_roster(response).await;
    }
}

fn log_outcome(outcome: &RosterOutcome) {
    for failure in &outcome.failed {
        error!(jid = %failure.jid, error = %failure.error, "Error updating the user table");
    }
    if let Some(ref err) = outcome.batch_error {
        error!(error = %err, "Roster batch was not stored");
    } else if outcome.failed.is_empty() {
        info!(stored = outcome.written.len(), "Stored roster entries");
    } else {
        warn!(
            stored = outcome.written.len(),
            failed = outcome.failed.len(),
            "Stored roster entries with failures"
        );
    }
    if outcome.skipped > 0 {
        debug!(skipped = outcome.skipped, "Skipped non-roster entries");
    }
}

/// Member jids with duplicates removed, first occurrence kept.
fn unique_members(users: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    users
        .iter()
        .filter(|jid| !jid.is_empty() && seen.insert(jid.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionError;
    use crate::user::UserBatch;
    use anyhow::{Result, anyhow};
    use rosterbot_protocol::{GroupInfo, RosterUser};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Store double recording every call in a shared journal.
    #[derive(Default)]
    struct FakeStore {
        rows: Arc<Mutex<BTreeMap<String, UserRecord>>>,
        journal: Journal,
        reject: HashSet<String>,
        fail_begin: bool,
        fail_commit: bool,
    }

    struct FakeBatch {
        rows: Arc<Mutex<BTreeMap<String, UserRecord>>>,
        journal: Journal,
        reject: HashSet<String>,
        fail_commit: bool,
        staged: Vec<UserRecord>,
    }

    #[async_trait]
    impl UserStore for FakeStore {
        async fn upsert_user(&self, record: &UserRecord) -> Result<()> {
            self.rows
                .lock()
                .unwrap()
                .insert(record.jid.clone(), record.clone());
            Ok(())
        }

        async fn begin_batch(&self) -> Result<Box<dyn UserBatch>> {
            self.journal.lock().unwrap().push("begin".to_string());
            if self.fail_begin {
                return Err(anyhow!("connection lost"));
            }
            Ok(Box::new(FakeBatch {
                rows: self.rows.clone(),
                journal: self.journal.clone(),
                reject: self.reject.clone(),
                fail_commit: self.fail_commit,
                staged: Vec::new(),
            }))
        }
    }

    #[async_trait]
    impl UserBatch for FakeBatch {
        async fn upsert_user(&mut self, record: &UserRecord) -> Result<()> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("upsert:{}", record.jid));
            if self.reject.contains(&record.jid) {
                return Err(anyhow!("constraint violation"));
            }
            self.staged.push(record.clone());
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            self.journal.lock().unwrap().push("commit".to_string());
            if self.fail_commit {
                return Err(anyhow!("commit failed"));
            }
            let mut rows = self.rows.lock().unwrap();
            for record in self.staged {
                rows.insert(record.jid.clone(), record);
            }
            Ok(())
        }
    }

    /// Session double recording outbound actions in the same journal.
    #[derive(Default)]
    struct FakeActions {
        journal: Journal,
        fail_request: bool,
        fail_leave: bool,
    }

    impl SessionActions for FakeActions {
        fn request_info(&self, jids: &[String]) -> SessionResult<()> {
            if self.fail_request {
                return Err(SessionError::QueueFull);
            }
            self.journal
                .lock()
                .unwrap()
                .push(format!("request:{}", jids.join(",")));
            Ok(())
        }

        fn leave_group(&self, group_jid: &str) -> SessionResult<()> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("leave:{group_jid}"));
            if self.fail_leave {
                return Err(SessionError::QueueFull);
            }
            Ok(())
        }
    }

    fn collector(store: FakeStore, actions: FakeActions) -> RosterCollector {
        RosterCollector::new(Arc::new(store), Arc::new(actions))
    }

    fn roster(entries: Vec<RosterEntry>) -> RosterResponse {
        RosterResponse { entries }
    }

    fn user(jid: &str) -> RosterUser {
        RosterUser::new(jid)
    }

    fn journal_of(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    fn leaves(journal: &Journal) -> Vec<String> {
        journal_of(journal)
            .into_iter()
            .filter(|line| line.starts_with("leave:"))
            .collect()
    }

    #[tokio::test]
    async fn test_group_status_requests_member_info() {
        let journal = Journal::default();
        let collector = collector(
            FakeStore::default(),
            FakeActions {
                journal: journal.clone(),
                ..Default::default()
            },
        );

        let status = GroupStatus {
            group: GroupInfo {
                jid: "g1".to_string(),
                users: vec!["u1".to_string(), "u2".to_string(), "u1".to_string()],
            },
        };
        collector.on_group_status_received(&status).await;

        assert_eq!(journal_of(&journal), vec!["request:u1,u2"]);
    }

    #[tokio::test]
    async fn test_group_status_without_members_requests_nothing() {
        let journal = Journal::default();
        let collector = collector(
            FakeStore::default(),
            FakeActions {
                journal: journal.clone(),
                ..Default::default()
            },
        );

        let status = GroupStatus {
            group: GroupInfo {
                jid: "g1".to_string(),
                users: vec![],
            },
        };
        assert!(collector.handle_group_status(&status).unwrap().is_empty());
        assert!(journal_of(&journal).is_empty());
    }

    #[tokio::test]
    async fn test_group_status_request_failure_is_swallowed() {
        let collector = collector(
            FakeStore::default(),
            FakeActions {
                fail_request: true,
                ..Default::default()
            },
        );

        let status = GroupStatus {
            group: GroupInfo {
                jid: "g1".to_string(),
                users: vec!["u1".to_string()],
            },
        };
        assert!(collector.handle_group_status(&status).is_err());
        // The event handler entry point must not panic or propagate.
        collector.on_group_status_received(&status).await;
    }

    #[tokio::test]
    async fn test_unknown_entries_are_skipped() {
        let journal = Journal::default();
        let store = FakeStore {
            journal: journal.clone(),
            ..Default::default()
        };
        let rows = store.rows.clone();
        let collector = collector(
            store,
            FakeActions {
                journal: journal.clone(),
                ..Default::default()
            },
        );

        let outcome = collector
            .handle_roster(&roster(vec![
                RosterEntry::Other,
                RosterEntry::Roster(user("u1").with_username("alice")),
                RosterEntry::Other,
            ]))
            .await;

        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.written, vec!["u1"]);
        assert_eq!(outcome.left_group, None);
        assert_eq!(journal_of(&journal), vec!["begin", "upsert:u1", "commit"]);
        assert_eq!(rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_entries_do_not_block_neighbours() {
        let journal = Journal::default();
        let collector = collector(
            FakeStore {
                journal: journal.clone(),
                ..Default::default()
            },
            FakeActions {
                journal: journal.clone(),
                ..Default::default()
            },
        );

        let outcome = collector
            .handle_roster(&roster(vec![
                RosterEntry::Roster(user("u1").with_group("g1")),
                RosterEntry::Invalid {
                    error: "missing field `kind`".to_string(),
                },
                RosterEntry::Roster(user("u3")),
            ]))
            .await;

        assert_eq!(outcome.written, vec!["u1", "u3"]);
        assert_eq!(outcome.invalid, 1);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(leaves(&journal), vec!["leave:g1"]);
    }

    #[tokio::test]
    async fn test_rejected_leave_is_logged_not_raised() {
        let journal = Journal::default();
        let store = FakeStore {
            journal: journal.clone(),
            ..Default::default()
        };
        let rows = store.rows.clone();
        let collector = collector(
            store,
            FakeActions {
                journal: journal.clone(),
                fail_leave: true,
                ..Default::default()
            },
        );

        let outcome = collector
            .handle_roster(&roster(vec![RosterEntry::Roster(
                user("u1").with_group("g1"),
            )]))
            .await;

        assert!(outcome.committed);
        assert_eq!(outcome.left_group.as_deref(), Some("g1"));
        assert_eq!(
            journal_of(&journal),
            vec!["begin", "upsert:u1", "commit", "leave:g1"]
        );
        assert!(rows.lock().unwrap().contains_key("u1"));
    }

    #[tokio::test]
    async fn test_last_group_wins() {
        let journal = Journal::default();
        let collector = collector(
            FakeStore {
                journal: journal.clone(),
                ..Default::default()
            },
            FakeActions {
                journal: journal.clone(),
                ..Default::default()
            },
        );

        let outcome = collector
            .handle_roster(&roster(vec![
                RosterEntry::Roster(user("u1").with_group("G1")),
                RosterEntry::Roster(user("u2")),
                RosterEntry::Roster(user("u3").with_group("G2")),
            ]))
            .await;

        assert_eq!(outcome.left_group.as_deref(), Some("G2"));
        assert_eq!(leaves(&journal), vec!["leave:G2"]);
    }

    #[tokio::test]
    async fn test_leave_fires_once_after_failed_upsert() {
        let journal = Journal::default();
        let store = FakeStore {
            journal: journal.clone(),
            reject: HashSet::from(["u2".to_string()]),
            ..Default::default()
        };
        let rows = store.rows.clone();
        let collector = collector(
            store,
            FakeActions {
                journal: journal.clone(),
                ..Default::default()
            },
        );

        let outcome = collector
            .handle_roster(&roster(vec![
                RosterEntry::Roster(user("u1").with_group("g1")),
                RosterEntry::Roster(user("u2")),
                RosterEntry::Roster(user("u3")),
            ]))
            .await;

        assert_eq!(
            journal_of(&journal),
            vec![
                "begin",
                "upsert:u1",
                "upsert:u2",
                "upsert:u3",
                "commit",
                "leave:g1"
            ]
        );
        assert_eq!(outcome.written, vec!["u1", "u3"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].jid, "u2");
        assert!(outcome.committed);

        let rows = rows.lock().unwrap();
        assert!(rows.contains_key("u1"));
        assert!(!rows.contains_key("u2"));
        assert!(rows.contains_key("u3"));
    }

    #[tokio::test]
    async fn test_leave_fires_when_commit_fails() {
        let journal = Journal::default();
        let store = FakeStore {
            journal: journal.clone(),
            fail_commit: true,
            ..Default::default()
        };
        let rows = store.rows.clone();
        let collector = collector(
            store,
            FakeActions {
                journal: journal.clone(),
                ..Default::default()
            },
        );

        let outcome = collector
            .handle_roster(&roster(vec![RosterEntry::Roster(
                user("u1").with_group("g1"),
            )]))
            .await;

        assert!(!outcome.committed);
        assert!(outcome.batch_error.is_some());
        assert_eq!(leaves(&journal), vec!["leave:g1"]);
        assert!(rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leave_fires_when_batch_cannot_open() {
        let journal = Journal::default();
        let collector = collector(
            FakeStore {
                journal: journal.clone(),
                fail_begin: true,
                ..Default::default()
            },
            FakeActions {
                journal: journal.clone(),
                ..Default::default()
            },
        );

        let outcome = collector
            .handle_roster(&roster(vec![
                RosterEntry::Roster(user("u1")),
                RosterEntry::Roster(user("u2").with_group("g7")),
            ]))
            .await;

        assert!(outcome.written.is_empty());
        assert_eq!(journal_of(&journal), vec!["begin", "leave:g7"]);
    }

    #[tokio::test]
    async fn test_no_group_means_no_leave() {
        let journal = Journal::default();
        let collector = collector(
            FakeStore {
                journal: journal.clone(),
                ..Default::default()
            },
            FakeActions {
                journal: journal.clone(),
                ..Default::default()
            },
        );

        let outcome = collector
            .handle_roster(&roster(vec![
                RosterEntry::Roster(user("u1")),
                RosterEntry::Roster(user("u2").with_group("")),
            ]))
            .await;

        assert_eq!(outcome.left_group, None);
        assert!(leaves(&journal).is_empty());
    }

    #[tokio::test]
    async fn test_empty_roster_commits_empty_batch() {
        let journal = Journal::default();
        let collector = collector(
            FakeStore {
                journal: journal.clone(),
                ..Default::default()
            },
            FakeActions {
                journal: journal.clone(),
                ..Default::default()
            },
        );

        let outcome = collector.handle_roster(&RosterResponse::default()).await;

        assert!(outcome.committed);
        assert_eq!(journal_of(&journal), vec!["begin", "commit"]);
    }

    #[test]
    fn test_unique_members_keeps_first_occurrence() {
        let users: Vec<String> = ["u2", "u1", "u2", "", "u3", "u1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(unique_members(&users), vec!["u2", "u1", "u3"]);
    }
}
