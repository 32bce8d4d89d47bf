use serde::Deserialize;
use tracing::info;

use casechain_common::Result;
use casechain_ledger::LedgerStore;

/// Side effects carried in a block's `log`, e.g.
/// `{"Action": "AddUser", "Username": ["alice"]}`. Any other log content is
/// an ordinary action and has no side effect.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "Action")]
pub enum LogDirective {
    AddUser {
        #[serde(rename = "Username")]
        usernames: Vec<String>,
    },
    RemoveUser {
        #[serde(rename = "Username")]
        usernames: Vec<String>,
    },
}

impl LogDirective {
    pub fn parse(log: &str) -> Option<Self> {
        serde_json::from_str(log).ok()
    }

    /// Applies the directive to the access table of `case_id`. Re-applying
    /// is a no-op. Returns how many rows changed.
    pub async fn apply(&self, store: &dyn LedgerStore, case_id: &str) -> Result<usize> {
        let mut changed = 0;
        match self {
            LogDirective::AddUser { usernames } => {
                for user in usernames {
                    if store.grant_access(user, case_id).await? {
                        info!("granted {} access to case {}", user, case_id);
                        changed += 1;
                    }
                }
            }
            LogDirective::RemoveUser { usernames } => {
                for user in usernames {
                    if store.revoke_access(user, case_id).await? {
                        info!("revoked {} access to case {}", user, case_id);
                        changed += 1;
                    }
                }
            }
        }
        Ok(changed)
    }
}
