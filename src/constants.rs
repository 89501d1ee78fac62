//! # System Constants
//!
//! Defaults and wire-level literals shared by the planner, executor and the
//! downstream stages.

/// Queue names used when configuration does not override them
pub mod queues {
    pub const WORK_QUEUE: &str = "crawl_splits";
    pub const COMPLETION_QUEUE: &str = "crawl_splits_downloaded";

    /// Suffix of the dead-letter exchange declared for the work queue
    pub const DEAD_LETTER_EXCHANGE_SUFFIX: &str = "_dlx";
    /// Suffix of the dead-letter queue bound to that exchange
    pub const DEAD_LETTER_QUEUE_SUFFIX: &str = "_dlq";
}

/// Status literal carried by completion messages
pub const STATUS_DOWNLOADED: &str = "DOWNLOADED";

/// AMQP delivery mode for persistent messages
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Connection Manager defaults
pub mod broker {
    pub const DEFAULT_RETRY_COUNT: u32 = 3;
    pub const DEFAULT_HEARTBEAT_SECONDS: u16 = 30;
    pub const MAX_BACKOFF_SECONDS: u64 = 30;

    pub const CONSUME_BLOCKED_TIMEOUT_SECONDS: u64 = 60;
    pub const CONSUME_CONNECTION_ATTEMPTS: u32 = 5;
    pub const CONSUME_PREFETCH_COUNT: u16 = 1;

    pub const PUBLISH_BLOCKED_TIMEOUT_SECONDS: u64 = 30;
    pub const PUBLISH_CONNECTION_ATTEMPTS: u32 = 2;

    /// Pause between connection attempts inside a single acquire
    pub const CONNECTION_ATTEMPT_DELAY_SECONDS: u64 = 2;

    /// `x-consumer-timeout` on the work queue; a split delivery may stay unacked this long
    pub const WORK_QUEUE_CONSUMER_TIMEOUT_MS: u64 = 4 * 60 * 60 * 1_000;
}

/// Split Executor defaults
pub mod executor {
    /// Empty pages beyond this many pages into a split end the split
    pub const EARLY_STOP_AFTER_PAGES: u64 = 10;
    pub const PAGE_RETRY_ATTEMPTS: u32 = 3;
    pub const PAGE_RETRY_BACKOFF_MS: u64 = 5_000;
    pub const PAGE_DELAY_MS: u64 = 500;
}

pub mod planner {
    pub const POLL_INTERVAL_SECONDS: u64 = 3;
    pub const CLAIM_TIMEOUT_SECONDS: u64 = 600;
}

/// Artifact naming and layout
pub mod storage {
    pub const DEFAULT_RAW_DIR: &str = "/mnt/raw";
    pub const DEFAULT_AUGMENTED_DIR: &str = "/mnt/augmented";
    pub const DEFAULT_LEDGER_FILE: &str = ".processed_files.json";
    pub const ARTIFACT_EXTENSION: &str = "json";
}

/// Record fields the downstream stages read and write
pub mod fields {
    pub const MESSAGES: &str = "messages";
    pub const COLLECTION: &str = "collection";
    pub const COUNT: &str = "count";
    pub const TOTAL: &str = "total";
    pub const ENTITIES: &str = "entities";
    pub const DEFAULT_TEXT_FIELD: &str = "rel_abs";
    pub const REL_DOI: &str = "rel_doi";
    pub const REL_AUTHORS: &str = "rel_authors";
    pub const AUTHOR_NAME: &str = "author_name";
    pub const AUTHOR_INST: &str = "author_inst";
    pub const CATEGORY: &str = "category";
    pub const REL_DATE: &str = "rel_date";
}
