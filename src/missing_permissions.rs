use std::{fmt, sync::Arc};

use serde::Serialize;

use crate::{accumulate::AppendOnly, collected::Namespace, permissions::Scope};

/// A permission shortfall discovered mid-collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PermissionGap {
    pub permission: Scope,
    pub entity_name: String,
    pub effect: String,
    pub namespace: Namespace,
}

impl PermissionGap {
    pub fn new(
        permission: Scope,
        entity_name: impl Into<String>,
        effect: impl Into<String>,
        namespace: Namespace,
    ) -> Self {
        Self { permission, entity_name: entity_name.into(), effect: effect.into(), namespace }
    }
}

impl fmt::Display for PermissionGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} (requires {})",
            self.namespace, self.entity_name, self.effect, self.permission
        )
    }
}

/// Run-wide list of permission gaps. Shared by every collector task; consumed
/// once by the reporter at the end of the run. Never deduplicated.
#[derive(Debug, Default)]
pub struct PermissionGapRegistry {
    gaps: AppendOnly<PermissionGap>,
}

impl PermissionGapRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, gaps: impl IntoIterator<Item = PermissionGap>) {
        self.gaps.extend(gaps);
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PermissionGap> {
        self.gaps.snapshot()
    }

    pub fn take(&self) -> Vec<PermissionGap> {
        self.gaps.take()
    }
}
