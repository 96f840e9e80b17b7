// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured log events for store activity.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreActivity {
    Hit,
    Miss,
    Expired,
    Rehydrated,
    Inserted,
    Evicted,
    Invalidated,
    Cleared,
    Pruned,
    PersistFailed,
}

impl StoreActivity {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "store.hit",
            Self::Miss => "store.miss",
            Self::Expired => "store.expired",
            Self::Rehydrated => "store.rehydrated",
            Self::Inserted => "store.inserted",
            Self::Evicted => "store.evicted",
            Self::Invalidated => "store.invalidated",
            Self::Cleared => "store.cleared",
            Self::Pruned => "store.pruned",
            Self::PersistFailed => "store.persist_failed",
        }
    }
}

pub(crate) fn record(store_name: &'static str, key: &str, activity: StoreActivity) {
    // Tracing levels must be constant, so each arm spells out its own macro.
    macro_rules! emit {
        ($level:ident) => {
            tracing::$level!(
                store.name = store_name,
                store.key = key,
                store.activity = activity.as_str(),
                "store activity"
            )
        };
    }

    match activity {
        StoreActivity::Hit | StoreActivity::Miss | StoreActivity::Inserted => emit!(debug),
        StoreActivity::Expired
        | StoreActivity::Rehydrated
        | StoreActivity::Evicted
        | StoreActivity::Invalidated
        | StoreActivity::Cleared
        | StoreActivity::Pruned => emit!(info),
        StoreActivity::PersistFailed => emit!(warn),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_names_share_prefix() {
        for activity in [
            StoreActivity::Hit,
            StoreActivity::Miss,
            StoreActivity::Expired,
            StoreActivity::Rehydrated,
            StoreActivity::Inserted,
            StoreActivity::Evicted,
            StoreActivity::Invalidated,
            StoreActivity::Cleared,
            StoreActivity::Pruned,
            StoreActivity::PersistFailed,
        ] {
            assert!(activity.as_str().starts_with("store."), "{activity:?}");
        }
    }
}
