use std::sync::Arc;

/// Lifecycle of a [`SimulatedRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting for its start time.
    Scheduled,
    /// Sent, waiting for its completion time.
    Started,
}

/// Whether a request is an original or a backup, with the information that
/// only makes sense for each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// A request issued by a caller.
    Original {
        /// Set when a backup was predicted to complete first. Decided once,
        /// when the backup is created.
        overridden_by_backup: bool,
    },
    /// A duplicate of a slow original.
    Backup {
        /// The original this backup duplicates, as it was when the backup
        /// was created.
        original: Arc<SimulatedRequest>,
    },
}

/// A synthetic request with a predicted completion time.
///
/// Values are immutable: state transitions return a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedRequest {
    start: u64,
    end: u64,
    state: RequestState,
    kind: RequestKind,
}

impl SimulatedRequest {
    /// Creates a scheduled original request.
    pub fn original(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self {
            start,
            end,
            state: RequestState::Scheduled,
            kind: RequestKind::Original {
                overridden_by_backup: false,
            },
        }
    }

    /// Creates a scheduled backup of `original`.
    ///
    /// # Panics
    ///
    /// Panics if `original` is itself a backup.
    pub fn backup(original: Arc<SimulatedRequest>, start: u64, end: u64) -> Self {
        assert!(!original.is_backup(), "a backup can not be backed up");
        debug_assert!(start <= end);
        Self {
            start,
            end,
            state: RequestState::Scheduled,
            kind: RequestKind::Backup { original },
        }
    }

    /// Returns the start time in nanoseconds.
    pub fn start_nanos(&self) -> u64 {
        self.start
    }

    /// Returns the predicted completion time in nanoseconds.
    pub fn end_nanos(&self) -> u64 {
        self.end
    }

    /// Returns the predicted response time of this request alone.
    pub fn duration_nanos(&self) -> u64 {
        self.end - self.start
    }

    /// Returns the state of the request.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Returns whether this is an original or a backup.
    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    /// Returns `true` for backups.
    pub fn is_backup(&self) -> bool {
        matches!(self.kind, RequestKind::Backup { .. })
    }

    /// Returns `true` for originals a backup was predicted to beat.
    pub fn is_overridden_by_backup(&self) -> bool {
        matches!(
            self.kind,
            RequestKind::Original {
                overridden_by_backup: true
            }
        )
    }

    /// Returns the started request.
    ///
    /// # Panics
    ///
    /// Panics if the request was already started, which means events were
    /// scheduled incorrectly.
    pub fn started(self) -> Self {
        assert_eq!(
            RequestState::Scheduled,
            self.state,
            "request starting at {} was already started",
            self.start
        );
        Self {
            state: RequestState::Started,
            ..self
        }
    }

    /// Returns this original, marked as overridden by a backup or not.
    ///
    /// # Panics
    ///
    /// Panics if called on a backup.
    pub fn overridden_by_backup(self, overridden: bool) -> Self {
        assert!(!self.is_backup(), "only originals can be overridden");
        Self {
            kind: RequestKind::Original {
                overridden_by_backup: overridden,
            },
            ..self
        }
    }
}
