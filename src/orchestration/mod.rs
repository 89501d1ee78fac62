//! # Orchestration
//!
//! The split pipeline's long-running stages.
//!
//! ## Core Components
//!
//! - **SplitPlanner**: claims one job at a time, counts the source, publishes one
//!   [`SplitMessage`](crate::messaging::SplitMessage) per bounded page range
//! - **SplitExecutor**: consumes splits one at a time, crawls the page range,
//!   writes the combined and summary artifacts
//! - **CompletionPublisher**: announces finished splits on the completion queue
//!   through its own publish session
//!
//! Each stage runs a single control loop and stops when the shutdown watch flips.

pub mod completion_publisher;
pub mod split_executor;
pub mod split_planner;
pub mod types;

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

pub use completion_publisher::CompletionPublisher;
pub use split_executor::SplitExecutor;
pub use split_planner::{split_count, SplitPlanner};
pub use types::{CombinedPages, PlanOutcome, SplitOutcome, SplitRange};

/// Sleep for `duration` unless shutdown is signalled first; `true` means stop
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        () = sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
