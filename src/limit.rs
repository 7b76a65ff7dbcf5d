//! Development-mode call-permission guard.
//!
//! Enabled by the runtime's debug flag. Catches the cross-actor pattern that
//! is forbidden in game code: one role actor asking another role actor
//! directly (role-to-role coordination must go through a global). Denied asks
//! resolve to the default value without dispatching.

use tracing::error;

use crate::context::CallContext;
use crate::types::ActorId;

#[derive(Debug, Clone, Copy, Default)]
pub struct CallGuard {
    enabled: bool,
}

impl CallGuard {
    pub fn new(enabled: bool) -> Self {
        CallGuard { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `caller` may ask `target`. A disabled guard always allows.
    pub fn allow(&self, caller: CallContext, target: ActorId) -> bool {
        if !self.enabled {
            return true;
        }
        if let Some(from) = caller.actor_id {
            if from.is_role() && target.is_role() && from != target {
                error!(
                    from = %from,
                    to = %target,
                    chain_id = caller.chain_id,
                    "forbidden role-to-role call denied"
                );
                return false;
            }
        }
        true
    }
}
