//! Deferred group exit.

use tracing::{error, info};

use crate::session::SessionActions;

/// Leaves the targeted group exactly once: on [`fire`] or, failing that,
/// on drop.
///
/// [`fire`]: LeaveGuard::fire
pub(crate) struct LeaveGuard<'a> {
    actions: &'a dyn SessionActions,
    group_jid: Option<String>,
}

impl<'a> LeaveGuard<'a> {
    pub(crate) fn new(actions: &'a dyn SessionActions) -> Self {
        Self {
            actions,
            group_jid: None,
        }
    }

    /// Point the guard at a group. A later call replaces the target.
    pub(crate) fn target(&mut self, group_jid: &str) {
        self.group_jid = Some(group_jid.to_string());
    }

    /// Leave now. Returns the group left, if any.
    pub(crate) fn fire(mut self) -> Option<String> {
        self.leave()
    }

    fn leave(&mut self) -> Option<String> {
        let group_jid = self.group_jid.take()?;
        match self.actions.leave_group(&group_jid) {
            Ok(()) => info!(group = %group_jid, "Leaving group"),
            Err(e) => error!(group = %group_jid, error = %e, "Error leaving group"),
        }
        Some(group_jid)
    }
}

impl Drop for LeaveGuard<'_> {
    fn drop(&mut self) {
        self.leave();
    }
}
