// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

use std::collections::HashSet;

use crate::pbgc_core::AGENT_BUNDLE_ID;

/// Outcome of testing one bundle identifier against the blocklist.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LaunchVerdict {
    /// Not on the list.
    Allow,
    /// The agent itself; exempt even when an administrator lists it.
    AllowSelf,
    /// Listed and not the agent: interdict.
    Block,
}

/// Set of bundle identifiers whose launches are interdicted after the
/// deadline. Immutable once constructed from policy.
pub struct BlockedApplicationSet {
    ids: HashSet<String>,
}

impl BlockedApplicationSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Per-identifier decision. The agent's own identifier short-circuits to
    /// `AllowSelf` before the membership test so a mis-pushed policy can
    /// never make the agent terminate itself.
    pub fn verdict(&self, bundle_id: &str) -> LaunchVerdict {
        if bundle_id == AGENT_BUNDLE_ID {
            return LaunchVerdict::AllowSelf;
        }
        if self.ids.contains(bundle_id) {
            LaunchVerdict::Block
        } else {
            LaunchVerdict::Allow
        }
    }
}
