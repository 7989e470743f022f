#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use sift::controller::{CONFIG_ENV, CONFIG_SEARCH_PATH, Sift};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);

    Sift::load(explicit.as_deref(), &CONFIG_SEARCH_PATH)?.run().await
}
