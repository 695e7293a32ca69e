//! Heuristic timeout estimation
//!
//! Classifies a document by filename and a bounded read of its content
//! against a table of workload signals, and recommends a timeout tier.
//! This is a heuristic, not a guarantee: it only sets the enforcement
//! ceiling the monitor applies to the engine process.

use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Baseline for trivial documents
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Numerical/ML library imports: model loading takes a while
pub const ML_IMPORT_TIMEOUT_SECS: u64 = 240;

/// Cross-runtime package restoration (foreign package managers)
pub const PACKAGE_RESTORE_TIMEOUT_SECS: u64 = 480;

/// Heavy interactive-AI or kernel-bootstrap workloads
pub const HEAVY_WORKLOAD_TIMEOUT_SECS: u64 = 1800;

/// How much of the document content is inspected, at most
const MAX_CONTENT_SCAN_BYTES: u64 = 64 * 1024;

/// Signal table: lowercase substring patterns and the tier they escalate to
///
/// The estimator takes the maximum tier among all matches; the default
/// tier always applies when nothing matches.
const SIGNAL_TIERS: &[(&[&str], u64)] = &[
    (
        &[
            "ollama",
            "openai",
            "anthropic",
            "langchain",
            "transformers",
            "huggingface",
            "llm",
        ],
        HEAVY_WORKLOAD_TIMEOUT_SECS,
    ),
    (
        &[
            "install.packages(",
            "renv::restore",
            "rpy2",
            "pkg.add(",
            "pip install",
            "conda install",
        ],
        PACKAGE_RESTORE_TIMEOUT_SECS,
    ),
    (
        &[
            "import torch",
            "import tensorflow",
            "import keras",
            "from sklearn",
            "import sklearn",
            "import xgboost",
            "import lightgbm",
        ],
        ML_IMPORT_TIMEOUT_SECS,
    ),
];

/// Recommends a timeout in seconds for the given document
///
/// Never fails: an unreadable or missing file degrades to filename-only
/// classification, and no match at all yields the default tier.
pub fn estimate_timeout(input_path: &Path) -> u64 {
    let filename = input_path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let mut timeout = classify(&filename).unwrap_or(DEFAULT_TIMEOUT_SECS);

    match read_head(input_path) {
        Ok(content) => {
            if let Some(tier) = classify(&content.to_lowercase()) {
                timeout = timeout.max(tier);
            }
        }
        Err(e) => {
            debug!(
                "Could not read {} for timeout estimation, using filename signals only: {}",
                input_path.display(),
                e
            );
        }
    }

    debug!(
        "Estimated timeout for {}: {}s",
        input_path.display(),
        timeout
    );

    timeout
}

/// Returns the highest tier matched by any signal pattern, if any
fn classify(haystack: &str) -> Option<u64> {
    SIGNAL_TIERS
        .iter()
        .filter(|(patterns, _)| patterns.iter().any(|p| haystack.contains(p)))
        .map(|(_, tier)| *tier)
        .max()
}

/// Reads at most `MAX_CONTENT_SCAN_BYTES` of the document
fn read_head(path: &Path) -> std::io::Result<String> {
    let file = std::fs::File::open(path)?;
    let mut head = String::new();
    file.take(MAX_CONTENT_SCAN_BYTES).read_to_string(&mut head)?;
    Ok(head)
}
