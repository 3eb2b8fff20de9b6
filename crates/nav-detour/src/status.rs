//! Status codes for navigation operations
//!
//! A [`Status`] is a completion state ([`Completion`]) plus a set of
//! [`StatusDetail`] flags. Failures travel as `Err(Status)`; successes that
//! carry detail (a partial path, a result buffer that was too small) travel
//! alongside their output so callers can still use the start-anchored data.

use bitflags::bitflags;
use std::fmt;

/// Result type for navigation operations
pub type Result<T> = std::result::Result<T, Status>;

/// How an operation finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum Completion {
    /// Operation succeeded
    Success,
    /// Operation failed
    Failure,
    /// Operation is still running (sliced queries)
    InProgress,
}

bitflags! {
    /// Detail information attached to a status
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(
        feature = "serialization",
        derive(serde::Serialize, serde::Deserialize)
    )]
    pub struct StatusDetail: u32 {
        /// Input data is not recognized
        const WRONG_MAGIC = 1 << 0;
        /// Input data is in the wrong version
        const WRONG_VERSION = 1 << 1;
        /// Operation ran out of memory or slots
        const OUT_OF_MEMORY = 1 << 2;
        /// An input parameter was invalid
        const INVALID_PARAM = 1 << 3;
        /// Result buffer for the query was too small to store all results
        const BUFFER_TOO_SMALL = 1 << 4;
        /// Query ran out of nodes during search
        const OUT_OF_NODES = 1 << 5;
        /// Query did not reach the end location, returning best guess
        const PARTIAL_RESULT = 1 << 6;
        /// A tile has already been assigned to the given x,y coordinate
        const ALREADY_OCCUPIED = 1 << 7;
    }
}

/// Status of a navigation operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Status {
    /// Completion state
    pub completion: Completion,
    /// Detail flags
    pub detail: StatusDetail,
}

impl Status {
    /// Bitmask value of a failed status in the packed representation
    pub const FAILURE_BIT: u32 = 1 << 31;
    /// Bitmask value of a successful status in the packed representation
    pub const SUCCESS_BIT: u32 = 1 << 30;
    /// Bitmask value of an in-progress status in the packed representation
    pub const IN_PROGRESS_BIT: u32 = 1 << 29;
    /// Mask of the detail bits in the packed representation
    pub const DETAIL_MASK: u32 = 0x0ff_ffff;

    /// Plain success
    pub const SUCCESS: Status = Status::new(Completion::Success, StatusDetail::empty());
    /// Plain failure
    pub const FAILURE: Status = Status::new(Completion::Failure, StatusDetail::empty());
    /// Plain in-progress
    pub const IN_PROGRESS: Status = Status::new(Completion::InProgress, StatusDetail::empty());

    /// Creates a status from a completion state and details
    pub const fn new(completion: Completion, detail: StatusDetail) -> Self {
        Self { completion, detail }
    }

    /// Creates a success status with detail
    pub const fn success(detail: StatusDetail) -> Self {
        Self::new(Completion::Success, detail)
    }

    /// Creates a failure status with detail
    pub const fn failure(detail: StatusDetail) -> Self {
        Self::new(Completion::Failure, detail)
    }

    /// Creates an in-progress status with detail
    pub const fn in_progress(detail: StatusDetail) -> Self {
        Self::new(Completion::InProgress, detail)
    }

    /// Failure caused by an invalid parameter
    pub const fn invalid_param() -> Self {
        Self::failure(StatusDetail::INVALID_PARAM)
    }

    /// Returns true if status is success
    pub fn is_success(&self) -> bool {
        self.completion == Completion::Success
    }

    /// Returns true if status is failure
    pub fn is_failure(&self) -> bool {
        self.completion == Completion::Failure
    }

    /// Returns true if status is in progress
    pub fn is_in_progress(&self) -> bool {
        self.completion == Completion::InProgress
    }

    /// Returns true if the specific detail is set
    pub fn has_detail(&self, detail: StatusDetail) -> bool {
        self.detail.intersects(detail)
    }

    /// Returns the status with additional details
    pub fn with_detail(mut self, detail: StatusDetail) -> Self {
        self.detail |= detail;
        self
    }

    /// Packs the status into the bitmask representation
    pub fn bits(&self) -> u32 {
        let completion = match self.completion {
            Completion::Success => Self::SUCCESS_BIT,
            Completion::Failure => Self::FAILURE_BIT,
            Completion::InProgress => Self::IN_PROGRESS_BIT,
        };
        completion | (self.detail.bits() & Self::DETAIL_MASK)
    }

    /// Unpacks a bitmask status. Failure takes precedence over the other
    /// completion bits; a mask without completion bits is a failure.
    pub fn from_bits(bits: u32) -> Self {
        let completion = if bits & Self::FAILURE_BIT != 0 {
            Completion::Failure
        } else if bits & Self::IN_PROGRESS_BIT != 0 {
            Completion::InProgress
        } else if bits & Self::SUCCESS_BIT != 0 {
            Completion::Success
        } else {
            Completion::Failure
        };
        Self::new(
            completion,
            StatusDetail::from_bits_truncate(bits & Self::DETAIL_MASK),
        )
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.completion {
            Completion::Success => write!(f, "Success")?,
            Completion::Failure => write!(f, "Failure")?,
            Completion::InProgress => write!(f, "In Progress")?,
        }

        let names = [
            (StatusDetail::WRONG_MAGIC, "Wrong Magic"),
            (StatusDetail::WRONG_VERSION, "Wrong Version"),
            (StatusDetail::OUT_OF_MEMORY, "Out of Memory"),
            (StatusDetail::INVALID_PARAM, "Invalid Param"),
            (StatusDetail::BUFFER_TOO_SMALL, "Buffer Too Small"),
            (StatusDetail::OUT_OF_NODES, "Out of Nodes"),
            (StatusDetail::PARTIAL_RESULT, "Partial Result"),
            (StatusDetail::ALREADY_OCCUPIED, "Already Occupied"),
        ];
        let details: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.detail.contains(*flag))
            .map(|(_, name)| *name)
            .collect();

        if !details.is_empty() {
            write!(f, " ({})", details.join(", "))?;
        }

        Ok(())
    }
}

impl std::error::Error for Status {}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        log::debug!("navigation data read failed: {err}");
        Status::invalid_param()
    }
}
